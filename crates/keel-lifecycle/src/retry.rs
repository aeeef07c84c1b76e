//! Bounded-time polling around a caller-supplied probe.
//!
//! The probe is called immediately, then every `interval` until it reports
//! [`Probe::Done`] or [`Probe::Abort`], or until `timeout` has elapsed. The
//! timeout is cooperative: it is checked between probes, so a probe that
//! never resolves is never interrupted.
//!
//! # Example
//!
//! ```ignore
//! use keel_lifecycle::retry::{poll, Probe};
//!
//! let state = poll("restore to finish", &policy, || async {
//!     match client.inspect("nightly").await {
//!         Ok(s) if s.is_terminal() => Probe::Done(s),
//!         Ok(s) => Probe::retry_observed(s),
//!         Err(e) => Probe::Abort(e),
//!     }
//! })
//! .await?;
//! ```

use std::fmt::Debug;
use std::future::Future;

use keel_common::{Error, Result, RetryPolicy};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of a single probe call
#[derive(Debug)]
pub enum Probe<T> {
    /// Target condition reached; stop polling and return the value
    Done(T),
    /// Stop polling now and return the error
    Abort(Error),
    /// Not there yet; poll again after the interval
    Retry {
        /// Value seen on this attempt, reported if the poll times out
        observed: Option<T>,
        /// Why the condition is not met yet, reported if the poll times out
        reason: Option<Error>,
    },
}

impl<T> Probe<T> {
    /// Retry without recording anything
    pub fn retry() -> Self {
        Self::Retry {
            observed: None,
            reason: None,
        }
    }

    /// Retry, remembering the value seen on this attempt
    pub fn retry_observed(value: T) -> Self {
        Self::Retry {
            observed: Some(value),
            reason: None,
        }
    }

    /// Retry, remembering why the condition is not met
    pub fn retry_because(reason: Error) -> Self {
        Self::Retry {
            observed: None,
            reason: Some(reason),
        }
    }
}

/// Poll `probe` until it finishes or `policy.timeout()` elapses.
///
/// # Arguments
/// * `condition` - Human-readable description of what is awaited, used in
///   logs and in the timeout error
/// * `policy` - Timeout and interval
/// * `probe` - Async closure called once per attempt
///
/// # Returns
/// The value of the first [`Probe::Done`], the error of the first
/// [`Probe::Abort`], or [`Error::Timeout`] carrying the last observed value
/// and the last reported error.
pub async fn poll<T, F, Fut>(condition: &str, policy: &RetryPolicy, mut probe: F) -> Result<T>
where
    T: Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    let mut last_observed: Option<T> = None;
    let mut last_error: Option<Error> = None;

    loop {
        attempt += 1;

        match probe().await {
            Probe::Done(value) => {
                debug!(condition, attempt, "condition met");
                return Ok(value);
            }
            Probe::Abort(err) => {
                debug!(condition, attempt, error = %err, "poll aborted");
                return Err(err);
            }
            Probe::Retry { observed, reason } => {
                if let Some(reason) = &reason {
                    debug!(condition, attempt, reason = %reason, "condition not met");
                } else {
                    debug!(condition, attempt, observed = ?observed, "condition not met");
                }
                if observed.is_some() {
                    last_observed = observed;
                }
                if reason.is_some() {
                    last_error = reason;
                }
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout() {
            warn!(
                condition,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                "timed out waiting for condition"
            );
            return Err(Error::timeout(
                condition,
                elapsed,
                last_observed.map(|v| format!("{:?}", v)),
                last_error,
            ));
        }

        // Never sleep past the deadline, so the final probe lands on it
        let delay = policy.interval().min(policy.timeout() - elapsed);
        tokio::time::sleep(delay).await;
    }
}

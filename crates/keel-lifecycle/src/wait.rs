//! Waiting for operations to reach a state of interest
//!
//! [`StateMachine::wait_for`] drives the retry poller against a
//! [`StatusSource`]. On every probe it fetches the raw status, classifies it,
//! and asks the caller's [`Target`] whether to stop:
//!
//! - the target accepts the state: done
//! - the target rejects the state: fail fast with a terminal mismatch instead
//!   of spinning until the timeout, because the answer is already final
//! - otherwise: keep polling
//!
//! Targets are not limited to completion. Waiting for `InProgress` before
//! issuing a second, competing operation is how race windows are opened.

use std::fmt;
use std::sync::Arc;

use keel_common::{Error, OperationState, Result, RetryPolicy};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::retry::{poll, Probe};
use crate::state::{classify, Operation, StatusSource};

type Predicate = dyn Fn(OperationState) -> bool + Send + Sync;

/// Condition a wait should stop at
#[derive(Clone)]
pub struct Target {
    description: String,
    accept: Arc<Predicate>,
    reject: Vec<OperationState>,
}

impl Target {
    /// Stop when `accept` returns true; fail fast on irrecoverable states
    pub fn predicate(
        description: impl Into<String>,
        accept: impl Fn(OperationState) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            accept: Arc::new(accept),
            reject: Vec::new(),
        }
    }

    /// Stop at exactly `state`
    pub fn state(state: OperationState) -> Self {
        Self::predicate(state.to_string(), move |s| s == state)
    }

    /// Stop at any of `states`
    pub fn any_of(states: &[OperationState]) -> Self {
        let states = states.to_vec();
        let description = states
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" or ");
        Self::predicate(description, move |s| states.contains(&s))
    }

    /// Stop at any terminal state
    pub fn completion() -> Self {
        Self::predicate("any terminal state", |s| s.is_terminal())
    }

    /// Also fail fast on `states` when they are not accepted
    pub fn rejecting(mut self, states: &[OperationState]) -> Self {
        for state in states {
            if !self.reject.contains(state) {
                self.reject.push(*state);
            }
        }
        self
    }

    /// Human-readable description of the target
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns true if polling should stop successfully at `state`
    pub fn accepts(&self, state: OperationState) -> bool {
        (self.accept)(state)
    }

    /// Returns true if `state` is final and not accepted
    ///
    /// Irrecoverable states are always final; [`Target::rejecting`] adds more.
    pub fn rejects(&self, state: OperationState) -> bool {
        !self.accepts(state) && (state.is_irrecoverable() || self.reject.contains(&state))
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("description", &self.description)
            .field("reject", &self.reject)
            .finish_non_exhaustive()
    }
}

/// Drives operations toward caller-defined targets
pub struct StateMachine<S> {
    source: S,
}

impl<S: StatusSource> StateMachine<S> {
    /// Create a state machine reading from `source`
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// The underlying status source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch and classify the current state once, without polling
    pub async fn observe(&self, operation: &mut Operation) -> Result<OperationState> {
        let raw = self
            .source
            .fetch_status(operation.kind(), operation.id())
            .await?
            .ok_or_else(|| Error::not_found(operation.describe()))?;
        let state = classify(operation.kind(), &raw.status)?;
        operation.record(state, raw.reason);
        Ok(state)
    }

    /// Poll until the operation reaches a state `target` accepts.
    ///
    /// Fails fast with [`Error::TerminalMismatch`] when the control plane
    /// reports a state the target rejects, with [`Error::UnknownStatus`] on a
    /// status outside the kind's vocabulary, and with the client's error when
    /// the status fetch itself fails. The last observed state and error are
    /// recorded on `operation` in every case.
    pub async fn wait_for(
        &self,
        operation: &mut Operation,
        target: &Target,
        policy: &RetryPolicy,
    ) -> Result<OperationState> {
        let description = operation.describe();
        let condition = format!("{} to reach {}", description, target.description());
        let last_seen: Mutex<Option<(OperationState, Option<String>)>> = Mutex::new(None);

        let result = {
            let source = &self.source;
            let kind = operation.kind();
            let id = operation.id();
            let description = description.as_str();
            let last_seen = &last_seen;

            poll(&condition, policy, move || async move {
                let raw = match source.fetch_status(kind, id).await {
                    Ok(Some(raw)) => raw,
                    Ok(None) => return Probe::Abort(Error::not_found(description)),
                    Err(e) => return Probe::Abort(e),
                };
                let state = match classify(kind, &raw.status) {
                    Ok(state) => state,
                    Err(e) => return Probe::Abort(e),
                };
                debug!(operation = description, state = %state, "observed operation state");
                *last_seen.lock() = Some((state, raw.reason.clone()));

                if target.accepts(state) {
                    Probe::Done(state)
                } else if target.rejects(state) {
                    Probe::Abort(Error::terminal_mismatch(
                        description,
                        target.description(),
                        state,
                        raw.reason,
                    ))
                } else {
                    Probe::retry_observed(state)
                }
            })
            .await
        };

        if let Some((state, reason)) = last_seen.into_inner() {
            operation.record(state, reason);
        }
        operation.record_result(&result);

        if let Ok(state) = &result {
            info!(operation = %description, state = %state, "operation reached target");
        }
        result
    }

    /// Poll until the operation reaches any terminal state
    pub async fn wait_for_completion(
        &self,
        operation: &mut Operation,
        policy: &RetryPolicy,
    ) -> Result<OperationState> {
        self.wait_for(operation, &Target::completion(), policy).await
    }

    /// Poll until the control plane no longer knows the operation.
    ///
    /// Any state observed meanwhile, `Deleting` or otherwise, counts as still
    /// present and is reported in the timeout error. Retryable fetch errors
    /// are polled through and surface only as the timeout's source.
    pub async fn wait_for_removal(
        &self,
        operation: &mut Operation,
        policy: &RetryPolicy,
    ) -> Result<()> {
        let description = operation.describe();
        let condition = format!("{} to be removed", description);
        let last_seen: Mutex<Option<(OperationState, Option<String>)>> = Mutex::new(None);

        let result = {
            let source = &self.source;
            let kind = operation.kind();
            let id = operation.id();
            let description = description.as_str();
            let last_seen = &last_seen;

            poll(&condition, policy, move || async move {
                let raw = match source.fetch_status(kind, id).await {
                    Ok(Some(raw)) => raw,
                    Ok(None) => return Probe::Done(None),
                    Err(e) if e.is_retryable() => return Probe::retry_because(e),
                    Err(e) => return Probe::Abort(e),
                };
                match classify(kind, &raw.status) {
                    Ok(state) => {
                        debug!(operation = description, state = %state, "still present");
                        *last_seen.lock() = Some((state, raw.reason));
                        Probe::retry_observed(Some(state))
                    }
                    Err(e) => Probe::Abort(e),
                }
            })
            .await
        };

        if let Some((state, reason)) = last_seen.into_inner() {
            operation.record(state, reason);
        }
        operation.record_result(&result);

        result.map(|_| {
            info!(operation = %description, "operation removed");
        })
    }
}

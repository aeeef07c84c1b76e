//! Operation tracking and raw status classification
//!
//! The control plane reports status as free-form strings whose vocabulary
//! differs per operation kind (a backup can be `Captured`, a restore can be
//! `Retained`). [`classify`] is the single place those strings are mapped onto
//! [`OperationState`]; anything outside a kind's vocabulary is an error rather
//! than being silently treated as "not done yet".

use async_trait::async_trait;
use keel_common::{Error, OperationKind, OperationRef, OperationState, Result};
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Status as reported by the control plane, before classification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawStatus {
    /// Status string, e.g. `"InProgress"`
    pub status: String,
    /// Free-form reason accompanying the status
    pub reason: Option<String>,
}

impl RawStatus {
    /// Status without a reason
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            reason: None,
        }
    }

    /// Status with a reason
    pub fn with_reason(status: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            reason: Some(reason.into()),
        }
    }
}

/// Source of ground truth for operation status
///
/// Implemented by adapters over the control plane client. Every call must
/// re-fetch from the control plane; nothing is cached between polls.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetch the current raw status of an operation
    ///
    /// Returns `Ok(None)` when the control plane no longer knows the object.
    async fn fetch_status(&self, kind: OperationKind, id: &OperationRef)
        -> Result<Option<RawStatus>>;
}

/// Map a raw status string to an [`OperationState`] using `kind`'s vocabulary
pub fn classify(kind: OperationKind, raw: &str) -> Result<OperationState> {
    use OperationKind as K;
    use OperationState as S;

    let state = match (kind, raw) {
        (_, "Pending") => S::Pending,
        (_, "InProgress") => S::InProgress,
        (K::Backup, "Captured") => S::InProgress,
        (K::Backup | K::Restore | K::Generic, "PartialSuccess") => S::PartialSuccess,
        (K::Restore, "Retained") => S::PartialSuccess,
        (_, "Success") => S::Success,
        (_, "Failed") => S::Failed,
        (K::Backup, "CloudBackupMissing") => S::Failed,
        (_, "Aborted") => S::Aborted,
        (_, "Deleting") => S::Deleting,
        (K::Backup | K::Restore | K::ScheduleDeletion, "DeletePending") => S::Deleting,
        _ => return Err(Error::unknown_status(kind, raw)),
    };
    Ok(state)
}

/// One remote long-running action and what has been observed about it
#[derive(Clone, Debug)]
pub struct Operation {
    kind: OperationKind,
    id: OperationRef,
    state: Option<OperationState>,
    reason: Option<String>,
    last_error: Option<String>,
}

impl Operation {
    /// Track an operation; nothing is observed until the first poll
    pub fn new(kind: OperationKind, id: OperationRef) -> Self {
        Self {
            kind,
            id,
            state: None,
            reason: None,
            last_error: None,
        }
    }

    /// Track a backup by name in the default organization
    pub fn backup(name: impl Into<String>) -> Self {
        Self::new(OperationKind::Backup, OperationRef::named(name))
    }

    /// Track a restore by name in the default organization
    pub fn restore(name: impl Into<String>) -> Self {
        Self::new(OperationKind::Restore, OperationRef::named(name))
    }

    /// Track a backup schedule deletion by name in the default organization
    pub fn schedule_deletion(name: impl Into<String>) -> Self {
        Self::new(OperationKind::ScheduleDeletion, OperationRef::named(name))
    }

    /// Operation kind
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Control plane handle
    pub fn id(&self) -> &OperationRef {
        &self.id
    }

    /// Last state reported by the control plane
    pub fn state(&self) -> Option<OperationState> {
        self.state
    }

    /// Reason accompanying the last reported state
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Error from the most recent wait, if it failed
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Kind and reference, for logs and errors
    pub fn describe(&self) -> String {
        format!("{} {}", self.kind, self.id)
    }

    /// Record a state reported by the control plane
    pub(crate) fn record(&mut self, state: OperationState, reason: Option<String>) {
        if let Some(previous) = self.state {
            if previous.regresses_to(state) {
                warn!(
                    operation = %self.describe(),
                    previous = %previous,
                    observed = %state,
                    "control plane reported a state earlier than one already observed"
                );
            }
        }
        self.state = Some(state);
        self.reason = reason;
    }

    pub(crate) fn record_result<T>(&mut self, result: &Result<T>) {
        self.last_error = result.as_ref().err().map(|e| e.to_string());
    }
}

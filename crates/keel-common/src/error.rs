//! Error types for Keel
//!
//! Errors follow the lifecycle controller's taxonomy: transient probe results
//! never surface on their own, while timeouts, terminal mismatches, and
//! task-level failures are returned to the immediate caller with enough
//! context to explain what was being waited for and what was seen instead.

use std::time::Duration;

use thiserror::Error;

use crate::operation::{OperationKind, OperationState};

/// Main error type for Keel operations
#[derive(Debug, Error)]
pub enum Error {
    /// A poll never reached its target before the timeout elapsed
    #[error("timed out after {elapsed:?} waiting for {condition}{}", describe_last(.last_observed))]
    Timeout {
        /// What the poll was waiting for
        condition: String,
        /// Wall-clock time spent polling
        elapsed: Duration,
        /// Debug rendering of the last value the probe observed
        last_observed: Option<String>,
        /// The last error the probe reported, if any
        source: Option<Box<Error>>,
    },

    /// An operation reached a final state that does not satisfy the target
    #[error("{operation} expected {expected} but reached {actual}{}", describe_reason(.reason))]
    TerminalMismatch {
        /// Operation description (kind and reference)
        operation: String,
        /// Description of the target condition
        expected: String,
        /// State reported by the control plane
        actual: OperationState,
        /// Reason reported by the control plane, if any
        reason: Option<String>,
    },

    /// A raw status value could not be mapped to an operation state
    #[error("unrecognized {kind} status {raw:?}")]
    UnknownStatus {
        /// Kind of operation whose vocabulary was used
        kind: OperationKind,
        /// Raw status as reported by the control plane
        raw: String,
    },

    /// The control plane no longer knows the operation
    #[error("{operation} not found")]
    NotFound {
        /// Operation description
        operation: String,
    },

    /// The control plane client failed
    #[error("control plane error for {operation}: {message}")]
    ControlPlane {
        /// Operation description
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// A task in a batch panicked
    #[error("task {index} panicked: {message}")]
    TaskPanicked {
        /// Position of the task in its batch
        index: usize,
        /// Panic payload, when it was a string
        message: String,
    },

    /// A spawned task could not be joined
    #[error("task {index} aborted: {message}")]
    TaskAborted {
        /// Position of the task in its batch
        index: usize,
        /// Join failure description
        message: String,
    },

    /// One or more tasks in a batch failed
    #[error("{failed} of {total} tasks failed; first failure: {first}")]
    Batch {
        /// Number of failed tasks
        failed: usize,
        /// Batch size
        total: usize,
        /// Rendering of the first failure in report order
        first: String,
    },

    /// A random sample asked for more items than exist
    #[error("cannot sample {requested} items from a sequence of {available}")]
    SampleTooLarge {
        /// Requested sample size
        requested: usize,
        /// Length of the input sequence
        available: usize,
    },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },
}

fn describe_last(last: &Option<String>) -> String {
    match last {
        Some(value) => format!(" (last observed: {value})"),
        None => String::new(),
    }
}

fn describe_reason(reason: &Option<String>) -> String {
    match reason.as_deref() {
        Some(r) if !r.is_empty() => format!(" because of [{r}]"),
        _ => String::new(),
    }
}

impl Error {
    /// Create a timeout error
    ///
    /// `last_observed` is the rendering of the last value seen and `source`
    /// the last error reported while polling, when there were any.
    pub fn timeout(
        condition: impl Into<String>,
        elapsed: Duration,
        last_observed: Option<String>,
        source: Option<Error>,
    ) -> Self {
        Self::Timeout {
            condition: condition.into(),
            elapsed,
            last_observed,
            source: source.map(Box::new),
        }
    }

    /// Create a terminal mismatch error
    pub fn terminal_mismatch(
        operation: impl Into<String>,
        expected: impl Into<String>,
        actual: OperationState,
        reason: Option<String>,
    ) -> Self {
        Self::TerminalMismatch {
            operation: operation.into(),
            expected: expected.into(),
            actual,
            reason,
        }
    }

    /// Create an unknown status error
    pub fn unknown_status(kind: OperationKind, raw: impl Into<String>) -> Self {
        Self::UnknownStatus {
            kind,
            raw: raw.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(operation: impl Into<String>) -> Self {
        Self::NotFound {
            operation: operation.into(),
        }
    }

    /// Create a control plane client error
    pub fn control_plane(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ControlPlane {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Check if this error is a poll timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Check if this error is a terminal mismatch
    pub fn is_terminal_mismatch(&self) -> bool {
        matches!(self, Error::TerminalMismatch { .. })
    }

    /// Check if waiting again could produce a different answer
    ///
    /// Terminal mismatches and classification failures are final. Timeouts
    /// and control plane errors may clear up on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::TerminalMismatch { .. } => false,
            Error::UnknownStatus { .. } => false,
            Error::NotFound { .. } => false,
            Error::ControlPlane { .. } => true,
            Error::TaskPanicked { .. } => false,
            Error::TaskAborted { .. } => true,
            Error::Batch { .. } => false,
            Error::SampleTooLarge { .. } => false,
            Error::Config { .. } => false,
        }
    }

    /// State reported by the control plane, for errors that carry one
    pub fn observed_state(&self) -> Option<OperationState> {
        match self {
            Error::TerminalMismatch { actual, .. } => Some(*actual),
            _ => None,
        }
    }

    /// Index of the failing task, for task-level errors
    pub fn task_index(&self) -> Option<usize> {
        match self {
            Error::TaskPanicked { index, .. } | Error::TaskAborted { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::error::Error as _;

    #[rstest]
    #[case::timeout(Error::timeout("restore to finish", Duration::from_secs(1), None, None), true)]
    #[case::control_plane(Error::control_plane("backup default/a", "connection reset"), true)]
    #[case::aborted_worker(Error::TaskAborted { index: 0, message: "cancelled".into() }, true)]
    #[case::mismatch(
        Error::terminal_mismatch("backup default/a", "Success", OperationState::Failed, None),
        false
    )]
    #[case::not_found(Error::not_found("restore default/b"), false)]
    #[case::config(Error::config("bad interval"), false)]
    #[case::sample(Error::SampleTooLarge { requested: 3, available: 1 }, false)]
    fn test_retryable_errors(#[case] err: Error, #[case] retryable: bool) {
        assert_eq!(err.is_retryable(), retryable, "{err}");
    }

    /// Story: a restore that fails outright is reported immediately with the
    /// control plane's reason, not after the full timeout.
    #[test]
    fn story_terminal_mismatch_names_expected_and_actual() {
        let err = Error::terminal_mismatch(
            "restore default/nightly",
            "Success",
            OperationState::Failed,
            Some("volume snapshot missing".to_string()),
        );
        let msg = err.to_string();
        assert!(msg.contains("restore default/nightly"));
        assert!(msg.contains("expected Success"));
        assert!(msg.contains("reached Failed"));
        assert!(msg.contains("volume snapshot missing"));
        assert!(err.is_terminal_mismatch());
        assert!(!err.is_retryable());
        assert_eq!(err.observed_state(), Some(OperationState::Failed));
    }

    #[test]
    fn test_terminal_mismatch_omits_empty_reason() {
        let err = Error::terminal_mismatch("backup x", "Success", OperationState::Aborted, None);
        assert!(!err.to_string().contains("because"));

        let err = Error::terminal_mismatch(
            "backup x",
            "Success",
            OperationState::Aborted,
            Some(String::new()),
        );
        assert!(!err.to_string().contains("because"));
    }

    /// Story: a timeout keeps the last thing the probe saw and the last error
    /// it returned, so the narrative can explain why it gave up.
    #[test]
    fn story_timeout_carries_last_observation() {
        let err = Error::Timeout {
            condition: "restore default/nightly to reach Success".to_string(),
            elapsed: Duration::from_secs(600),
            last_observed: Some("InProgress".to_string()),
            source: Some(Box::new(Error::control_plane(
                "restore default/nightly",
                "connection reset",
            ))),
        };
        let msg = err.to_string();
        assert!(msg.contains("timed out after 600s"));
        assert!(msg.contains("last observed: InProgress"));
        assert!(err.is_timeout());
        assert!(err.is_retryable());

        let source = err.source().expect("timeout should expose last error");
        assert!(source.to_string().contains("connection reset"));
    }

    #[test]
    fn test_bare_timeout_has_no_source() {
        let err = Error::timeout("anything", Duration::from_millis(5), None, None);
        assert!(err.source().is_none());
        assert!(!err.to_string().contains("last observed"));
    }

    #[test]
    fn test_task_errors_expose_index() {
        let err = Error::TaskPanicked {
            index: 3,
            message: "boom".to_string(),
        };
        assert_eq!(err.task_index(), Some(3));
        assert!(err.to_string().contains("task 3 panicked: boom"));
        assert_eq!(Error::config("x").task_index(), None);
    }

    #[test]
    fn test_unknown_status_is_not_retryable() {
        let err = Error::unknown_status(OperationKind::Backup, "Invalid");
        assert_eq!(err.to_string(), "unrecognized backup status \"Invalid\"");
        assert!(!err.is_retryable());
    }
}

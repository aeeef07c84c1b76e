//! Operation kinds, states, and references
//!
//! An operation is a long-running action owned by the remote control plane
//! (a backup, a restore, a schedule deletion). Keel never changes an
//! operation's state; it only observes and reports what the control plane
//! says.

use serde::{Deserialize, Serialize};

use crate::DEFAULT_ORG_ID;

/// Kind of remote operation being tracked
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Backup creation
    Backup,
    /// Restore creation
    Restore,
    /// Deletion of a backup schedule
    ScheduleDeletion,
    /// Any other operation reporting canonical state names
    Generic,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backup => write!(f, "backup"),
            Self::Restore => write!(f, "restore"),
            Self::ScheduleDeletion => write!(f, "schedule-deletion"),
            Self::Generic => write!(f, "operation"),
        }
    }
}

/// Observed state of a remote operation
///
/// States move forward only: `Pending -> InProgress -> terminal`.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum OperationState {
    /// Accepted but not started
    Pending,
    /// Running
    InProgress,
    /// Finished, but some resources were skipped or retained
    PartialSuccess,
    /// Finished cleanly
    Success,
    /// Finished with an error
    Failed,
    /// Cancelled before finishing
    Aborted,
    /// Being deleted by the control plane
    Deleting,
}

impl OperationState {
    /// Every state, in progression order
    pub const ALL: [OperationState; 7] = [
        Self::Pending,
        Self::InProgress,
        Self::PartialSuccess,
        Self::Success,
        Self::Failed,
        Self::Aborted,
        Self::Deleting,
    ];

    /// States from which the operation never leaves on its own
    pub const IRRECOVERABLE: [OperationState; 3] = [Self::Failed, Self::Aborted, Self::Deleting];

    /// Returns true for any state the controller stops waiting at
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }

    /// Returns true for terminal states that can never turn into a success
    pub fn is_irrecoverable(&self) -> bool {
        Self::IRRECOVERABLE.contains(self)
    }

    /// Returns true for Success and PartialSuccess
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess)
    }

    /// Position in the forward-only progression (all terminal states share a rank)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            _ => 2,
        }
    }

    /// Returns true if moving from `self` to `next` goes backwards
    pub fn regresses_to(&self, next: OperationState) -> bool {
        next.rank() < self.rank()
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "InProgress"),
            Self::PartialSuccess => write!(f, "PartialSuccess"),
            Self::Success => write!(f, "Success"),
            Self::Failed => write!(f, "Failed"),
            Self::Aborted => write!(f, "Aborted"),
            Self::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Handle used to query the control plane about one operation
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct OperationRef {
    /// Object name
    pub name: String,
    /// Object UID, when the control plane has assigned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Organization owning the object
    pub org_id: String,
}

impl OperationRef {
    /// Reference an object by name in the default organization
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: None,
            org_id: DEFAULT_ORG_ID.to_string(),
        }
    }

    /// Set the object UID
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Set the owning organization
    pub fn in_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = org_id.into();
        self
    }
}

impl std::fmt::Display for OperationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.uid {
            Some(uid) => write!(f, "{}/{} ({})", self.org_id, self.name, uid),
            None => write!(f, "{}/{}", self.org_id, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_are_everything_after_in_progress() {
        let terminal: Vec<_> = OperationState::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal.len(), 5);
        assert!(!OperationState::Pending.is_terminal());
        assert!(!OperationState::InProgress.is_terminal());
    }

    #[test]
    fn test_irrecoverable_states_are_never_successful() {
        for state in OperationState::IRRECOVERABLE {
            assert!(state.is_terminal());
            assert!(!state.is_successful());
        }
        assert!(!OperationState::Success.is_irrecoverable());
        assert!(!OperationState::PartialSuccess.is_irrecoverable());
    }

    #[test]
    fn test_regression_only_counts_backward_moves() {
        assert!(OperationState::InProgress.regresses_to(OperationState::Pending));
        assert!(OperationState::Success.regresses_to(OperationState::InProgress));
        assert!(!OperationState::Pending.regresses_to(OperationState::Success));
        // Terminal to terminal is a sideways move (e.g. Success -> Deleting)
        assert!(!OperationState::Success.regresses_to(OperationState::Deleting));
    }

    #[test]
    fn test_operation_ref_display_includes_org_and_uid() {
        let op = OperationRef::named("nightly").in_org("acme");
        assert_eq!(op.to_string(), "acme/nightly");

        let op = op.with_uid("1234");
        assert_eq!(op.to_string(), "acme/nightly (1234)");
    }

    #[test]
    fn test_operation_state_serializes_as_variant_name() {
        let json = serde_json::to_string(&OperationState::PartialSuccess).unwrap();
        assert_eq!(json, "\"PartialSuccess\"");
    }
}

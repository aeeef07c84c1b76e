//! Named waits used by backup and restore workflows
//!
//! Each wait pairs a [`Target`] with the [`RetryPolicy`] configured for it.
//! Success waits fail fast on `Failed`, `Aborted`, and `Deleting`, and also on
//! the success variant they were not asked for, since neither can turn into
//! the other.

use std::sync::Arc;

use keel_common::{
    Error, OperationKind, OperationState, PolicyConfig, PolicySettings, Result, RetryPolicy,
};
use keel_lifecycle::{task, BatchReport, ExecutionMode, Operation, StateMachine, Target};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::control_plane::{ControlPlane, ControlPlaneSource};

/// How a restore treats resources that already exist in the target namespace
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ReplacePolicy {
    /// Existing resources are replaced; the restore is expected to fully succeed
    Delete,
    /// Existing resources are kept; the restore is expected to end `Retained`
    Retain,
}

impl ReplacePolicy {
    /// Final state a restore with this policy should reach
    pub fn expected_state(self) -> OperationState {
        match self {
            ReplacePolicy::Delete => OperationState::Success,
            ReplacePolicy::Retain => OperationState::PartialSuccess,
        }
    }
}

/// What a batch wait expects of each operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expectation {
    /// Backups reach `Success`; restores reach `Success` or `PartialSuccess`
    Success,
    /// Restores reach the state their replace policy implies
    Replace(ReplacePolicy),
    /// Restores are observed running
    InProgress,
    /// Any terminal state
    Completion,
    /// The control plane no longer knows the object
    Removal,
}

/// Waits for backups, restores, and schedule deletions
pub struct BackupWaits<C> {
    machine: StateMachine<ControlPlaneSource<C>>,
    config: PolicyConfig,
}

impl<C: ControlPlane> BackupWaits<C> {
    /// Create waits over `client` using `config`'s policies
    pub fn new(client: C, config: PolicyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            machine: StateMachine::new(ControlPlaneSource::new(client)),
            config,
        })
    }

    /// Create waits with the default policies
    pub fn with_defaults(client: C) -> Self {
        Self {
            machine: StateMachine::new(ControlPlaneSource::new(client)),
            config: PolicyConfig::default(),
        }
    }

    /// Policies in use
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// The underlying control plane client
    pub fn client(&self) -> &C {
        self.machine.source().client()
    }

    /// Wait for a backup to reach `Success`
    #[instrument(skip_all, fields(operation = %backup.id()))]
    pub async fn backup_success(&self, backup: &mut Operation) -> Result<OperationState> {
        expect_kind(backup, OperationKind::Backup)?;
        let target = Target::state(OperationState::Success).rejecting(&[OperationState::PartialSuccess]);
        self.wait(backup, &target, &self.config.backup_creation).await
    }

    /// Wait for a restore to reach `Success` or `PartialSuccess`
    #[instrument(skip_all, fields(operation = %restore.id()))]
    pub async fn restore_success(&self, restore: &mut Operation) -> Result<OperationState> {
        expect_kind(restore, OperationKind::Restore)?;
        let target = Target::any_of(&[OperationState::Success, OperationState::PartialSuccess]);
        self.wait(restore, &target, &self.config.restore_creation).await
    }

    /// Wait for a restore to reach the state `policy` implies
    #[instrument(skip_all, fields(operation = %restore.id(), policy = ?policy))]
    pub async fn restore_with_replace_policy(
        &self,
        restore: &mut Operation,
        policy: ReplacePolicy,
    ) -> Result<OperationState> {
        expect_kind(restore, OperationKind::Restore)?;
        let expected = policy.expected_state();
        let other = match policy {
            ReplacePolicy::Delete => OperationState::PartialSuccess,
            ReplacePolicy::Retain => OperationState::Success,
        };
        let target = Target::state(expected).rejecting(&[other]);
        self.wait(restore, &target, &self.config.restore_creation).await
    }

    /// Wait until a restore is observed `InProgress`
    ///
    /// Opens the window for issuing a second, competing restore. A restore
    /// that already finished, successfully or not, means the window was
    /// missed and fails immediately.
    #[instrument(skip_all, fields(operation = %restore.id()))]
    pub async fn restore_in_progress(&self, restore: &mut Operation) -> Result<OperationState> {
        expect_kind(restore, OperationKind::Restore)?;
        let target = Target::state(OperationState::InProgress)
            .rejecting(&[OperationState::Success, OperationState::PartialSuccess]);
        self.wait(restore, &target, &self.config.restore_in_progress).await
    }

    /// Wait for a restore to reach any terminal state
    ///
    /// Unlike the success waits, a failed restore is a valid answer here.
    #[instrument(skip_all, fields(operation = %restore.id()))]
    pub async fn restore_completion(&self, restore: &mut Operation) -> Result<OperationState> {
        expect_kind(restore, OperationKind::Restore)?;
        let policy = self.config.restore_creation.policy()?;
        self.machine.wait_for_completion(restore, &policy).await
    }

    /// Wait for a deleted backup to disappear
    #[instrument(skip_all, fields(operation = %backup.id()))]
    pub async fn backup_deletion(&self, backup: &mut Operation) -> Result<()> {
        expect_kind(backup, OperationKind::Backup)?;
        self.removal(backup, &self.config.backup_deletion).await
    }

    /// Wait for a deleted restore to disappear
    #[instrument(skip_all, fields(operation = %restore.id()))]
    pub async fn restore_deletion(&self, restore: &mut Operation) -> Result<()> {
        expect_kind(restore, OperationKind::Restore)?;
        self.removal(restore, &self.config.restore_deletion).await
    }

    /// Wait for a deleted backup schedule to disappear
    #[instrument(skip_all, fields(operation = %schedule.id()))]
    pub async fn schedule_deletion(&self, schedule: &mut Operation) -> Result<()> {
        expect_kind(schedule, OperationKind::ScheduleDeletion)?;
        self.removal(schedule, &self.config.schedule_deletion).await
    }

    /// Apply `expectation` to one operation, picking the wait by kind
    pub async fn expect(&self, operation: &mut Operation, expectation: Expectation) -> Result<()> {
        use OperationKind as K;

        match (expectation, operation.kind()) {
            (Expectation::Success, K::Backup) => self.backup_success(operation).await.map(drop),
            (Expectation::Success, K::Restore) => self.restore_success(operation).await.map(drop),
            (Expectation::Replace(policy), K::Restore) => self
                .restore_with_replace_policy(operation, policy)
                .await
                .map(drop),
            (Expectation::InProgress, K::Restore) => {
                self.restore_in_progress(operation).await.map(drop)
            }
            (Expectation::Completion, K::Backup) => {
                let policy = self.config.backup_creation.policy()?;
                self.machine
                    .wait_for_completion(operation, &policy)
                    .await
                    .map(drop)
            }
            (Expectation::Completion, K::Restore) => {
                self.restore_completion(operation).await.map(drop)
            }
            (Expectation::Removal, K::Backup) => self.backup_deletion(operation).await,
            (Expectation::Removal, K::Restore) => self.restore_deletion(operation).await,
            (Expectation::Removal, K::ScheduleDeletion) => self.schedule_deletion(operation).await,
            (expectation, kind) => Err(Error::config(format!(
                "no {:?} wait is defined for {}",
                expectation, kind
            ))),
        }
    }

    async fn wait(
        &self,
        operation: &mut Operation,
        target: &Target,
        settings: &PolicySettings,
    ) -> Result<OperationState> {
        let policy: RetryPolicy = settings.policy()?;
        self.machine.wait_for(operation, target, &policy).await
    }

    async fn removal(&self, operation: &mut Operation, settings: &PolicySettings) -> Result<()> {
        let policy = settings.policy()?;
        self.machine.wait_for_removal(operation, &policy).await
    }
}

impl<C: ControlPlane + 'static> BackupWaits<C> {
    /// Apply `expectation` to every operation, at most `max_parallel_tasks`
    /// at a time
    ///
    /// Every operation gets an outcome; successful outcomes hand back the
    /// operation with its final observed state.
    pub async fn wait_all(
        self: &Arc<Self>,
        batch: &str,
        operations: Vec<Operation>,
        expectation: Expectation,
    ) -> BatchReport<Operation> {
        let mode = ExecutionMode::BoundedParallel(self.config.max_parallel_tasks);
        info!(batch, count = operations.len(), ?expectation, "waiting on batch");

        let waits = Arc::clone(self);
        let report = task::run(operations, mode, move |mut operation| {
            let waits = Arc::clone(&waits);
            async move {
                waits.expect(&mut operation, expectation).await?;
                Ok(operation)
            }
        })
        .await;

        report.log_summary(batch);
        report
    }
}

fn expect_kind(operation: &Operation, kind: OperationKind) -> Result<()> {
    if operation.kind() != kind {
        return Err(Error::config(format!(
            "{} passed to a {} wait",
            operation.describe(),
            kind
        )));
    }
    Ok(())
}

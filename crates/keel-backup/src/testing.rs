//! In-memory control plane for tests
//!
//! [`ScriptedControlPlane`] replays a per-object script of inspect results.
//! Each inspect call consumes one step; the last step repeats forever.
//! Objects without a script are reported as absent.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use keel_common::{Error, OperationKind, OperationRef, Result};
use parking_lot::Mutex;

use crate::control_plane::{ControlPlane, StatusInfo};

/// One scripted inspect result
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    /// The object exists with this status
    Status(StatusInfo),
    /// The object is gone
    Missing,
    /// The inspect call itself fails
    Error(String),
}

impl ScriptStep {
    /// Object present with `status`
    pub fn status(status: &str) -> Self {
        Self::Status(StatusInfo::new(status))
    }

    /// Object present with `status` and `reason`
    pub fn with_reason(status: &str, reason: &str) -> Self {
        Self::Status(StatusInfo::with_reason(status, reason))
    }
}

type Key = (OperationKind, String);

#[derive(Default)]
struct Script {
    steps: VecDeque<ScriptStep>,
    calls: usize,
}

/// Control plane that answers from scripts
#[derive(Default)]
pub struct ScriptedControlPlane {
    scripts: Mutex<HashMap<Key, Script>>,
}

impl ScriptedControlPlane {
    /// Create a control plane that knows no objects
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the script for `name`
    pub fn script(&self, kind: OperationKind, name: &str, steps: impl IntoIterator<Item = ScriptStep>) {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry((kind, name.to_string())).or_default();
        script.steps = steps.into_iter().collect();
    }

    /// Script a sequence of statuses for `name`, the last one repeating
    pub fn script_statuses(&self, kind: OperationKind, name: &str, statuses: &[&str]) {
        self.script(kind, name, statuses.iter().map(|s| ScriptStep::status(s)));
    }

    /// Script a sequence of statuses for `name`, after which it disappears
    pub fn script_removal(&self, kind: OperationKind, name: &str, statuses: &[&str]) {
        self.script(
            kind,
            name,
            statuses
                .iter()
                .map(|s| ScriptStep::status(s))
                .chain(std::iter::once(ScriptStep::Missing)),
        );
    }

    /// Number of inspect calls made for `name`
    pub fn calls(&self, kind: OperationKind, name: &str) -> usize {
        self.scripts
            .lock()
            .get(&(kind, name.to_string()))
            .map(|s| s.calls)
            .unwrap_or(0)
    }

    fn next(&self, kind: OperationKind, id: &OperationRef) -> Result<Option<StatusInfo>> {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry((kind, id.name.clone())).or_default();
        script.calls += 1;

        let step = if script.steps.len() > 1 {
            script.steps.pop_front()
        } else {
            script.steps.front().cloned()
        };
        match step {
            Some(ScriptStep::Status(info)) => Ok(Some(info)),
            Some(ScriptStep::Missing) | None => Ok(None),
            Some(ScriptStep::Error(message)) => Err(Error::control_plane(id.to_string(), message)),
        }
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    async fn inspect_backup(&self, id: &OperationRef) -> Result<Option<StatusInfo>> {
        self.next(OperationKind::Backup, id)
    }

    async fn inspect_restore(&self, id: &OperationRef) -> Result<Option<StatusInfo>> {
        self.next(OperationKind::Restore, id)
    }

    async fn inspect_backup_schedule(&self, id: &OperationRef) -> Result<Option<StatusInfo>> {
        self.next(OperationKind::ScheduleDeletion, id)
    }
}

//! Control plane client abstraction
//!
//! The backup service answers "inspect" calls with a status string and an
//! optional reason. [`ControlPlane`] is the seam between the waits in this
//! crate and whatever client talks to the real service; [`ControlPlaneSource`]
//! adapts it to the lifecycle controller's [`StatusSource`].

use std::sync::Arc;

use async_trait::async_trait;
use keel_common::{Error, OperationKind, OperationRef, Result};
use keel_lifecycle::{RawStatus, StatusSource};
use serde::{Deserialize, Serialize};
use tracing::trace;

#[cfg(test)]
use mockall::automock;

/// Status block returned by an inspect call
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    /// Raw status, e.g. `"InProgress"` or `"Retained"`
    pub status: String,
    /// Reason the control plane gave for the status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusInfo {
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

impl From<StatusInfo> for RawStatus {
    fn from(info: StatusInfo) -> Self {
        RawStatus {
            status: info.status,
            reason: info.reason,
        }
    }
}

/// Trait abstracting the backup service's inspect calls
///
/// This trait allows mocking the control plane in tests while using the real
/// client in production. Each method returns `Ok(None)` when the service no
/// longer knows the object.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Inspect a backup
    async fn inspect_backup(&self, id: &OperationRef) -> Result<Option<StatusInfo>>;

    /// Inspect a restore
    async fn inspect_restore(&self, id: &OperationRef) -> Result<Option<StatusInfo>>;

    /// Inspect a backup schedule, typically one being deleted
    async fn inspect_backup_schedule(&self, id: &OperationRef) -> Result<Option<StatusInfo>>;
}

#[async_trait]
impl<C: ControlPlane + ?Sized> ControlPlane for Arc<C> {
    async fn inspect_backup(&self, id: &OperationRef) -> Result<Option<StatusInfo>> {
        (**self).inspect_backup(id).await
    }

    async fn inspect_restore(&self, id: &OperationRef) -> Result<Option<StatusInfo>> {
        (**self).inspect_restore(id).await
    }

    async fn inspect_backup_schedule(&self, id: &OperationRef) -> Result<Option<StatusInfo>> {
        (**self).inspect_backup_schedule(id).await
    }
}

/// [`StatusSource`] backed by a [`ControlPlane`], dispatching on operation kind
pub struct ControlPlaneSource<C> {
    client: C,
}

impl<C: ControlPlane> ControlPlaneSource<C> {
    /// Wrap a control plane client
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// The wrapped client
    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: ControlPlane> StatusSource for ControlPlaneSource<C> {
    async fn fetch_status(
        &self,
        kind: OperationKind,
        id: &OperationRef,
    ) -> Result<Option<RawStatus>> {
        let info = match kind {
            OperationKind::Backup => self.client.inspect_backup(id).await?,
            OperationKind::Restore => self.client.inspect_restore(id).await?,
            OperationKind::ScheduleDeletion => self.client.inspect_backup_schedule(id).await?,
            OperationKind::Generic => {
                return Err(Error::control_plane(
                    id.to_string(),
                    "the backup service has no inspect call for generic operations",
                ))
            }
        };
        trace!(%kind, operation = %id, status = ?info.as_ref().map(|i| i.status.as_str()), "inspected");
        Ok(info.map(RawStatus::from))
    }
}

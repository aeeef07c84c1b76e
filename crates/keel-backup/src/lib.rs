//! Backup, restore, and schedule deletion waits
//!
//! This crate applies the keel lifecycle controller to a backup service:
//!
//! - **control_plane**: the [`ControlPlane`] inspect trait and its adapter to
//!   the lifecycle controller's status source
//! - **waits**: [`BackupWaits`], one named wait per workflow step, plus
//!   batch waits through the task handler
//! - **testing** (feature `testing`): an in-memory, scripted control plane

pub mod control_plane;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod waits;

pub use control_plane::{ControlPlane, ControlPlaneSource, StatusInfo};
pub use waits::{BackupWaits, Expectation, ReplacePolicy};

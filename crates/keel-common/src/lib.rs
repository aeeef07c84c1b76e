//! Common types for Keel: errors, operation states, policies, and logging

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod operation;
pub mod telemetry;

pub use config::{PolicyConfig, PolicySettings, RetryPolicy};
pub use error::Error;
pub use operation::{OperationKind, OperationRef, OperationState};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Prefix for environment variables that override policy settings
pub const ENV_PREFIX: &str = "KEEL";

/// Default organization used when an operation reference does not name one
pub const DEFAULT_ORG_ID: &str = "default";

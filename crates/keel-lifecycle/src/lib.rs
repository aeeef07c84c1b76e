//! Lifecycle controller for remote long-running operations
//!
//! - **retry**: bounded-time polling around a caller-supplied probe
//! - **state**: operation tracking and raw status classification
//! - **wait**: driving operations toward caller-defined targets
//! - **aggregate**: lock-guarded accumulator shared by concurrent workers
//! - **task**: sequential, parallel, and bounded-parallel batch execution
//! - **sample**: random selection of representative items

#![deny(missing_docs)]

pub mod aggregate;
pub mod retry;
pub mod sample;
pub mod state;
pub mod task;
pub mod wait;

pub use aggregate::Aggregator;
pub use retry::{poll, Probe};
pub use sample::{sample, sample_with};
pub use state::{classify, Operation, RawStatus, StatusSource};
pub use task::{run, BatchReport, ExecutionMode, TaskOutcome};
pub use wait::{StateMachine, Target};

pub use keel_common::{Error, OperationKind, OperationRef, OperationState, Result, RetryPolicy};

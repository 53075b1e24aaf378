//! Operation tracker for Keel.
//!
//! Tracks long-running uploads and downloads: progress reporting, one
//! subscriber per operation, cooperative cancellation, and time-based
//! retention of finished operations.
//!
//! # Key Types
//!
//! - [`OperationTracker`] — registry of operations and their lifecycle
//! - [`Operation`] — read-only snapshot of one operation
//! - [`OperationEvent`] — what subscribers receive
//! - [`CancelToken`] — cooperative cancellation flag
//! - [`Pipeline`] / [`PipelineStep`] — weighted async steps the tracker drives
//!
//! # Design Rules
//!
//! 1. Cancellation is cooperative. It takes effect at a checkpoint, never in
//!    the middle of a step.
//! 2. Terminal states (Completed, Failed, Cancelled) are final.
//! 3. The tracker never retries a failure.
//! 4. Finished operations are purged once the retention window has passed.

pub mod cancel;
pub mod config;
pub mod error;
pub mod operation;
pub mod pipeline;
pub mod tracker;

pub use cancel::CancelToken;
pub use config::TrackerConfig;
pub use error::{OpsError, OpsResult};
pub use operation::{
    Operation, OperationCallback, OperationEvent, OperationKind, OperationStatus, StartOptions,
};
pub use pipeline::{FnStep, Pipeline, PipelineStep, StepContext, StepError};
pub use tracker::OperationTracker;

//! Foundation types for Keel.
//!
//! Every other Keel crate depends on `keel-types`. It carries the pieces that
//! several subsystems must agree on: how time is read, and how long-running
//! operations are identified.
//!
//! # Key Types
//!
//! - [`Clock`] — Injectable millisecond time source
//! - [`SystemClock`] — Wall-clock implementation used in production
//! - [`ManualClock`] — Hand-advanced clock for deterministic tests
//! - [`SharedClock`] — `Arc<dyn Clock>` passed between components
//! - [`OperationId`] — UUID v7 identifier for tracked operations

pub mod clock;
pub mod id;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use id::OperationId;

//! Ordered, batched state store for Keel.
//!
//! Writers enqueue [`Mutation`]s; nothing is visible until a flush applies
//! the whole queue atomically. Readers always see records in ascending id
//! order and only ever see flushed state.
//!
//! # Key Types
//!
//! - [`OrderedBatchStore`] — the store handle (cheap to clone)
//! - [`StateRecord`] — id, payload and flush-assigned version
//! - [`Merge`] — how partial updates combine with a payload
//! - [`FlushReport`] / [`StoreChanged`] — what a flush did
//!
//! # Design Rules
//!
//! 1. Mutations apply in arrival order; per id they coalesce, and a delete
//!    wins over earlier updates.
//! 2. The order index is the key set of a `BTreeMap` and cannot dangle.
//! 3. The debounce timer is guarded by an epoch: a manual flush disarms it.

pub mod config;
pub mod error;
pub mod merge;
pub mod mutation;
pub mod record;
pub mod store;

pub use config::{BatchConfig, FlushTrigger};
pub use error::{BatchError, BatchResult};
pub use merge::Merge;
pub use mutation::Mutation;
pub use record::StateRecord;
pub use store::{FlushReport, OrderedBatchStore, StoreChanged};

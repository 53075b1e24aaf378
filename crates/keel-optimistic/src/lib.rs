//! Optimistic commit ledger for Keel.
//!
//! A client shows a record before the backend has accepted it. The ledger
//! hands out a [`TempId`] for it and keeps the entry in a side table, never
//! in the ordered store. When the backend answers, [`OptimisticLedger::confirm`]
//! moves the canonical record into the [`OrderedBatchStore`](keel_batch::OrderedBatchStore)
//! and [`OptimisticLedger::fail`] marks the entry failed so the host can offer
//! a retry.
//!
//! Every entry transitions at most once: Pending to Confirmed, or Pending to
//! Failed.

pub mod entry;
pub mod error;
pub mod ledger;

pub use entry::{OptimisticEntry, OptimisticStatus, TempId, ViewItem};
pub use error::{OptimisticError, OptimisticResult};
pub use ledger::{OptimisticLedger, DEFAULT_SCOPE};

//! High-level SDK for Keel.
//!
//! [`Keel`] is the single context object an application creates at startup.
//! It builds the cache, liveness registry, resource monitor and operation
//! tracker once, wires them together, and hands out collection-scoped
//! batch stores and optimistic ledgers.
//!
//! ```no_run
//! # async fn demo() -> keel_sdk::SdkResult<()> {
//! use keel_sdk::{Keel, KeelConfig};
//!
//! let keel = Keel::builder(KeelConfig::default()).build()?;
//! let background = keel.spawn_background();
//! keel.monitor().report_usage(91.0)?;
//! // ...
//! background.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod config;
pub mod context;
pub mod error;

pub use background::BackgroundTasks;
pub use config::KeelConfig;
pub use context::{Keel, KeelBuilder};
pub use error::{SdkError, SdkResult};

// Re-export key types
pub use keel_batch::{BatchConfig, FlushReport, OrderedBatchStore, StateRecord};
pub use keel_cache::{CacheDefaults, CacheStore, Namespace};
pub use keel_liveness::{HandleMetadata, LivenessRegistry};
pub use keel_monitor::{
    FixedUsage, MonitorConfig, PressureLevel, ResourceMonitor, ScriptedUsage, TickReport, UsageSource,
};
pub use keel_optimistic::{OptimisticLedger, TempId};
pub use keel_ops::{OperationKind, OperationTracker, Pipeline, StartOptions, TrackerConfig};
pub use keel_types::{Clock, ManualClock, OperationId, SharedClock};

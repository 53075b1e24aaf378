//! Resource pressure monitor for Keel.
//!
//! The [`ResourceMonitor`] samples an abstract usage percentage on a fixed
//! interval, classifies it into a [`PressureLevel`], and runs cleanup that
//! escalates with the level:
//!
//! | Level     | Actions                                                          |
//! |-----------|------------------------------------------------------------------|
//! | Normal    | none                                                             |
//! | Warning   | sweep expired cache entries, prune old metrics and dead handles  |
//! | Critical  | Warning + forced LRU eviction of a fraction of every namespace   |
//! | Emergency | Critical + time-boxed suspension of non-critical work            |
//!
//! Each level's actions run directly; reaching Emergency does not require an
//! earlier Warning pass. Actions are idempotent and run on the monitor's own
//! schedule, never inline in a caller that reports usage.

pub mod config;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod pressure;
pub mod source;
pub mod throttle;

pub use config::{MonitorConfig, PressureThresholds};
pub use error::{MonitorError, MonitorResult};
pub use metrics::{MetricSample, MonitorMetrics};
pub use monitor::{ActionReport, ResourceMonitor, TickReport};
pub use pressure::PressureLevel;
pub use source::{FixedUsage, ScriptedUsage, UsageSource};
pub use throttle::WorkThrottle;

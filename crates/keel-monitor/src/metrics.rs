use serde::{Deserialize, Serialize};

use crate::pressure::PressureLevel;

/// One usage reading as classified at the time it was taken.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub at: u64,
    pub usage: f64,
    pub level: PressureLevel,
}

/// Point-in-time view of the monitor's history and counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorMetrics {
    pub level: PressureLevel,
    pub last_usage: Option<f64>,
    /// Retained samples, oldest first.
    pub samples: Vec<MetricSample>,
    pub samples_taken: u64,
    pub failed_samples: u64,
    pub level_changes: u64,
    pub expired_evicted: u64,
    pub lru_evicted: u64,
    pub handles_pruned: u64,
    pub suspensions: u64,
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OpsError, OpsResult};

/// Configuration for the [`OperationTracker`](crate::OperationTracker).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// How long a finished operation stays queryable.
    pub retention_ms: u64,
    /// Interval of the background retention sweep.
    pub sweep_interval_ms: u64,
    /// Cache namespace used to memoise results by `cache_key`.
    pub result_namespace: String,
    pub result_cache_size: usize,
    pub result_cache_ttl_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retention_ms: 5 * 60 * 1000,
            sweep_interval_ms: 30_000,
            result_namespace: "operation-results".into(),
            result_cache_size: 100,
            result_cache_ttl_ms: 5 * 60 * 1000,
        }
    }
}

impl TrackerConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.result_cache_ttl_ms)
    }

    pub fn validate(&self) -> OpsResult<()> {
        if self.sweep_interval_ms == 0 {
            return Err(OpsError::Config("sweep_interval_ms must be positive".into()));
        }
        if self.result_cache_size == 0 || self.result_cache_ttl_ms == 0 {
            return Err(OpsError::Config(
                "result cache size and ttl must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.retention(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_sweep_interval_rejected() {
        let config = TrackerConfig {
            sweep_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

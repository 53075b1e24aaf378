use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};

/// Usage percentages at which each pressure level begins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureThresholds {
    pub warning: f64,
    pub critical: f64,
    pub emergency: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            warning: 70.0,
            critical: 85.0,
            emergency: 95.0,
        }
    }
}

impl PressureThresholds {
    /// Thresholds must be strictly ascending and lie in (0, 100].
    pub fn validate(&self) -> MonitorResult<()> {
        let in_range = |v: f64| v > 0.0 && v <= 100.0;
        if !(in_range(self.warning) && in_range(self.critical) && in_range(self.emergency)) {
            return Err(MonitorError::InvalidThresholds(format!(
                "thresholds must lie in (0, 100]: {self:?}"
            )));
        }
        if !(self.warning < self.critical && self.critical < self.emergency) {
            return Err(MonitorError::InvalidThresholds(format!(
                "thresholds must be strictly ascending: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Configuration for the [`ResourceMonitor`](crate::ResourceMonitor).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between usage samples.
    pub sample_interval_ms: u64,
    /// Share of each namespace evicted at Critical and above.
    pub lru_eviction_fraction: f64,
    /// How long non-critical work stays suspended after an Emergency sample.
    pub emergency_cooldown_ms: u64,
    /// Metric samples older than this are pruned at Warning and above.
    pub metrics_retention_ms: u64,
    /// Hard cap on retained metric samples.
    pub max_samples: usize,
    /// Level boundaries.
    pub thresholds: PressureThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 2_000,
            lru_eviction_fraction: 0.25,
            emergency_cooldown_ms: 30_000,
            metrics_retention_ms: 5 * 60 * 1000,
            max_samples: 512,
            thresholds: PressureThresholds::default(),
        }
    }
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn emergency_cooldown(&self) -> Duration {
        Duration::from_millis(self.emergency_cooldown_ms)
    }

    /// Check every field, thresholds included.
    pub fn validate(&self) -> MonitorResult<()> {
        self.thresholds.validate()?;
        if self.sample_interval_ms == 0 {
            return Err(MonitorError::Config("sample_interval_ms must be positive".into()));
        }
        if !(self.lru_eviction_fraction > 0.0 && self.lru_eviction_fraction <= 1.0) {
            return Err(MonitorError::Config(format!(
                "lru_eviction_fraction must lie in (0, 1], got {}",
                self.lru_eviction_fraction
            )));
        }
        if self.max_samples == 0 {
            return Err(MonitorError::Config("max_samples must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_interval(), Duration::from_secs(2));
        assert_eq!(config.emergency_cooldown(), Duration::from_secs(30));
    }

    #[test]
    fn descending_thresholds_rejected() {
        let t = PressureThresholds {
            warning: 90.0,
            critical: 85.0,
            emergency: 95.0,
        };
        assert!(matches!(t.validate(), Err(MonitorError::InvalidThresholds(_))));
    }

    #[test]
    fn equal_thresholds_rejected() {
        let t = PressureThresholds {
            warning: 80.0,
            critical: 80.0,
            emergency: 95.0,
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn out_of_range_thresholds_rejected() {
        let t = PressureThresholds {
            warning: 70.0,
            critical: 85.0,
            emergency: 120.0,
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn bad_fraction_rejected() {
        let config = MonitorConfig {
            lru_eviction_fraction: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
    }

    #[test]
    fn zero_interval_rejected() {
        let config = MonitorConfig {
            sample_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"sample_interval_ms": 500}"#).unwrap();
        assert_eq!(config.sample_interval_ms, 500);
        assert_eq!(config.thresholds, PressureThresholds::default());
    }
}

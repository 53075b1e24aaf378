use std::path::Path;

use serde::{Deserialize, Serialize};

use keel_batch::BatchConfig;
use keel_cache::CacheDefaults;
use keel_monitor::MonitorConfig;
use keel_ops::TrackerConfig;

use crate::error::{SdkError, SdkResult};

/// Configuration for every Keel subsystem. Missing sections and fields take
/// their defaults.
///
/// ```toml
/// [cache]
/// max_size = 200
///
/// [monitor]
/// sample_interval_ms = 1000
///
/// [monitor.thresholds]
/// warning = 60.0
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    pub cache: CacheDefaults,
    pub monitor: MonitorConfig,
    pub batch: BatchConfig,
    pub tracker: TrackerConfig,
}

impl KeelConfig {
    pub fn from_toml_str(input: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> SdkResult<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> SdkResult<()> {
        if self.cache.max_size == 0 || self.cache.ttl_ms == 0 {
            return Err(SdkError::Config(
                "cache max_size and ttl_ms must be positive".into(),
            ));
        }
        self.monitor.validate()?;
        self.batch.validate()?;
        self.tracker.validate()?;
        Ok(())
    }
}

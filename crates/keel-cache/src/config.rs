use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Defaults applied to namespaces created without explicit parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDefaults {
    /// Maximum entries per namespace.
    pub max_size: usize,
    /// Default time-to-live in milliseconds.
    pub ttl_ms: u64,
}

impl Default for CacheDefaults {
    fn default() -> Self {
        Self {
            max_size: 100,
            ttl_ms: 5 * 60 * 1000,
        }
    }
}

impl CacheDefaults {
    /// The default TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, BatchResult};

/// When queued mutations are applied without an explicit `flush()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Flush once this long after the first mutation into an empty queue.
    Debounce(Duration),
    /// Only `flush()` / `flush_if_due()` apply mutations.
    Manual,
}

/// Configuration for an [`OrderedBatchStore`](crate::OrderedBatchStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Debounce window for automatic flushes.
    pub debounce_ms: u64,
    /// Arm a debounce timer on the tokio runtime when one is available.
    pub auto_flush: bool,
    /// Buffer size of the change-notification channel.
    pub channel_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 16,
            auto_flush: true,
            channel_capacity: 64,
        }
    }
}

impl BatchConfig {
    /// Defaults with automatic flushing turned off.
    pub fn manual() -> Self {
        Self {
            auto_flush: false,
            ..Self::default()
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn trigger(&self) -> FlushTrigger {
        if self.auto_flush {
            FlushTrigger::Debounce(self.debounce())
        } else {
            FlushTrigger::Manual
        }
    }

    pub fn validate(&self) -> BatchResult<()> {
        if self.channel_capacity == 0 {
            return Err(BatchError::Config("channel_capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_trigger_is_16ms_debounce() {
        let config = BatchConfig::default();
        assert_eq!(config.trigger(), FlushTrigger::Debounce(Duration::from_millis(16)));
        assert_eq!(BatchConfig::manual().trigger(), FlushTrigger::Manual);
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = BatchConfig {
            channel_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

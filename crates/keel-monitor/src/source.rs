use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{MonitorError, MonitorResult};

/// Produces the current resource usage as a percentage in [0, 100].
///
/// The monitor never assumes a particular measurement API; hosts adapt
/// whatever they have (process RSS, a heap counter, a platform hint) behind
/// this trait.
pub trait UsageSource: Send + Sync {
    fn sample(&self) -> MonitorResult<f64>;
}

/// A source that reports whatever value was last stored in it.
#[derive(Debug, Default)]
pub struct FixedUsage {
    bits: AtomicU64,
}

impl FixedUsage {
    pub fn new(usage: f64) -> Self {
        Self {
            bits: AtomicU64::new(usage.to_bits()),
        }
    }

    pub fn set(&self, usage: f64) {
        self.bits.store(usage.to_bits(), Ordering::SeqCst);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

impl UsageSource for FixedUsage {
    fn sample(&self) -> MonitorResult<f64> {
        Ok(self.get())
    }
}

/// A source that replays a fixed sequence of readings, then keeps reporting
/// the last one. An empty script fails every sample.
#[derive(Debug)]
pub struct ScriptedUsage {
    readings: Mutex<VecDeque<f64>>,
    last: Mutex<Option<f64>>,
}

impl ScriptedUsage {
    pub fn new(readings: impl IntoIterator<Item = f64>) -> Self {
        Self {
            readings: Mutex::new(readings.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    /// Readings not yet replayed.
    pub fn remaining(&self) -> usize {
        self.readings.lock().expect("script lock poisoned").len()
    }
}

impl UsageSource for ScriptedUsage {
    fn sample(&self) -> MonitorResult<f64> {
        let next = self.readings.lock().expect("script lock poisoned").pop_front();
        let mut last = self.last.lock().expect("script lock poisoned");
        if let Some(value) = next {
            *last = Some(value);
        }
        last.ok_or_else(|| MonitorError::SampleFailed("usage script is empty".into()))
    }
}

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of millisecond timestamps.
///
/// Components never read the wall clock directly. TTL checks, retention
/// windows, and suspension cooldowns all go through a `Clock` so tests can
/// move time forward explicitly.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary but fixed epoch.
    fn now_ms(&self) -> u64;

    /// Milliseconds elapsed since `earlier`, saturating at zero.
    fn elapsed_since(&self, earlier: u64) -> u64 {
        self.now_ms().saturating_sub(earlier)
    }
}

/// Shared, dynamically dispatched clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time in milliseconds since the UNIX epoch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Convenience constructor for a shared [`SystemClock`].
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// A clock that only moves when told to.
///
/// Cloning yields a handle to the same underlying time, so a test can keep one
/// copy and hand the other to the component under test.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Move the clock forward by a number of milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute reading. Going backwards is allowed; callers that
    /// compute ages saturate at zero.
    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    /// This clock as a [`SharedClock`].
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManualClock({}ms)", self.now_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2020() {
        // 2020-01-01 in ms
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now_ms(), 1_500);
        clock.advance_ms(25);
        assert_eq!(clock.now_ms(), 1_525);
    }

    #[test]
    fn clones_share_time() {
        let clock = ManualClock::new(0);
        let shared = clock.shared();
        clock.advance_ms(42);
        assert_eq!(shared.now_ms(), 42);
    }

    #[test]
    fn elapsed_saturates() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.elapsed_since(40), 60);
        assert_eq!(clock.elapsed_since(500), 0);
    }

    #[test]
    fn debug_format() {
        let clock = ManualClock::new(7);
        assert_eq!(format!("{clock:?}"), "ManualClock(7ms)");
    }
}

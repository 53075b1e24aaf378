use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use keel_cache::CacheStore;
use keel_liveness::LivenessRegistry;
use keel_types::SharedClock;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::metrics::{MetricSample, MonitorMetrics};
use crate::pressure::PressureLevel;
use crate::source::UsageSource;
use crate::throttle::WorkThrottle;

/// What one sample's cleanup pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    pub expired_evicted: usize,
    pub lru_evicted: usize,
    pub metrics_pruned: usize,
    pub handles_pruned: usize,
    /// End of the suspension window requested by this sample.
    pub suspended_until: Option<u64>,
}

/// Outcome of a single [`ResourceMonitor::tick`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TickReport {
    pub usage: f64,
    pub previous: PressureLevel,
    pub level: PressureLevel,
    pub actions: ActionReport,
}

impl TickReport {
    pub fn level_changed(&self) -> bool {
        self.previous != self.level
    }
}

struct MonitorState {
    level: PressureLevel,
    reported: Option<f64>,
    last_usage: Option<f64>,
    samples: VecDeque<MetricSample>,
    suspended_until: Option<u64>,
    samples_taken: u64,
    failed_samples: u64,
    level_changes: u64,
    expired_evicted: u64,
    lru_evicted: u64,
    handles_pruned: u64,
    suspensions: u64,
}

/// Samples resource usage and escalates cleanup with the pressure level.
///
/// The monitor owns no data. It acts on the [`CacheStore`] it was given, an
/// optional [`LivenessRegistry`], and an optional [`WorkThrottle`] that
/// receives emergency suspensions.
pub struct ResourceMonitor {
    config: MonitorConfig,
    clock: SharedClock,
    source: Arc<dyn UsageSource>,
    cache: Arc<CacheStore>,
    liveness: Option<Arc<LivenessRegistry>>,
    throttle: Option<Arc<dyn WorkThrottle>>,
    level_tx: watch::Sender<PressureLevel>,
    state: Mutex<MonitorState>,
}

impl ResourceMonitor {
    /// Create a monitor. Fails if the configuration does not validate.
    pub fn new(
        config: MonitorConfig,
        clock: SharedClock,
        source: Arc<dyn UsageSource>,
        cache: Arc<CacheStore>,
    ) -> MonitorResult<Self> {
        config.validate()?;
        let (level_tx, _) = watch::channel(PressureLevel::Normal);
        Ok(Self {
            config,
            clock,
            source,
            cache,
            liveness: None,
            throttle: None,
            level_tx,
            state: Mutex::new(MonitorState {
                level: PressureLevel::Normal,
                reported: None,
                last_usage: None,
                samples: VecDeque::new(),
                suspended_until: None,
                samples_taken: 0,
                failed_samples: 0,
                level_changes: 0,
                expired_evicted: 0,
                lru_evicted: 0,
                handles_pruned: 0,
                suspensions: 0,
            }),
        })
    }

    /// Prune dead handles from `registry` at Warning and above.
    pub fn with_liveness(mut self, registry: Arc<LivenessRegistry>) -> Self {
        self.liveness = Some(registry);
        self
    }

    /// Route emergency suspensions to `throttle`.
    pub fn with_throttle(mut self, throttle: Arc<dyn WorkThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Current pressure level.
    pub fn level(&self) -> PressureLevel {
        *self.level_tx.borrow()
    }

    /// Receive pressure-level changes. The receiver starts at the current
    /// level and only wakes when the level actually changes.
    pub fn subscribe(&self) -> watch::Receiver<PressureLevel> {
        self.level_tx.subscribe()
    }

    /// Push a reading from the host. It replaces the source's next sample and
    /// is acted on at the next tick, not inline.
    pub fn report_usage(&self, usage: f64) -> MonitorResult<()> {
        if !usage.is_finite() {
            return Err(MonitorError::InvalidSample(usage));
        }
        self.lock_state().reported = Some(usage.clamp(0.0, 100.0));
        Ok(())
    }

    /// Take one sample, classify it, and run the actions for its level.
    ///
    /// A failed or malformed sample leaves the level unchanged and is
    /// counted in [`MonitorMetrics::failed_samples`].
    pub fn tick(&self) -> MonitorResult<TickReport> {
        let usage = match self.read_usage() {
            Ok(usage) => usage,
            Err(e) => {
                self.lock_state().failed_samples += 1;
                return Err(e);
            }
        };

        let now = self.clock.now_ms();
        let level = PressureLevel::classify(usage, &self.config.thresholds);
        let actions = self.run_actions(level, now);

        let previous = {
            let mut state = self.lock_state();
            let previous = std::mem::replace(&mut state.level, level);
            state.last_usage = Some(usage);
            state.samples_taken += 1;
            state.expired_evicted += actions.expired_evicted as u64;
            state.lru_evicted += actions.lru_evicted as u64;
            state.handles_pruned += actions.handles_pruned as u64;
            state.samples.push_back(MetricSample { at: now, usage, level });
            while state.samples.len() > self.config.max_samples {
                state.samples.pop_front();
            }
            if previous != level {
                state.level_changes += 1;
            }
            previous
        };

        if previous != level {
            info!(from = %previous, to = %level, usage, "pressure level changed");
            self.level_tx.send_replace(level);
        } else {
            debug!(level = %level, usage, "usage sampled");
        }

        Ok(TickReport {
            usage,
            previous,
            level,
            actions,
        })
    }

    /// Sample on the configured interval until `shutdown` flips to `true` or
    /// its sender is dropped. Failed samples are logged and retried on the
    /// next interval.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.config.sample_interval_ms, "resource monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick() {
                        warn!(error = %e, "usage sample failed; retrying next interval");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("resource monitor stopped");
    }

    /// Snapshot of counters and retained samples.
    pub fn metrics(&self) -> MonitorMetrics {
        let state = self.lock_state();
        MonitorMetrics {
            level: state.level,
            last_usage: state.last_usage,
            samples: state.samples.iter().cloned().collect(),
            samples_taken: state.samples_taken,
            failed_samples: state.failed_samples,
            level_changes: state.level_changes,
            expired_evicted: state.expired_evicted,
            lru_evicted: state.lru_evicted,
            handles_pruned: state.handles_pruned,
            suspensions: state.suspensions,
        }
    }

    fn read_usage(&self) -> MonitorResult<f64> {
        if let Some(usage) = self.lock_state().reported.take() {
            return Ok(usage);
        }
        let usage = self.source.sample()?;
        if !usage.is_finite() {
            return Err(MonitorError::InvalidSample(usage));
        }
        Ok(usage.clamp(0.0, 100.0))
    }

    fn run_actions(&self, level: PressureLevel, now: u64) -> ActionReport {
        let mut report = ActionReport::default();

        if level >= PressureLevel::Warning {
            report.expired_evicted = self.cache.evict_expired_all();
            report.metrics_pruned = self.prune_samples(now);
            if let Some(registry) = &self.liveness {
                report.handles_pruned = registry.prune();
            }
        }

        if level >= PressureLevel::Critical {
            report.lru_evicted = self
                .cache
                .evict_lru_fraction_all(self.config.lru_eviction_fraction);
        }

        if level == PressureLevel::Emergency {
            let until = now.saturating_add(self.config.emergency_cooldown_ms);
            self.suspend(now, until);
            report.suspended_until = Some(until);
        }

        if level.is_elevated() {
            debug!(
                level = %level,
                expired = report.expired_evicted,
                lru = report.lru_evicted,
                handles = report.handles_pruned,
                "pressure actions applied"
            );
        }
        report
    }

    fn prune_samples(&self, now: u64) -> usize {
        let retention = self.config.metrics_retention_ms;
        let mut state = self.lock_state();
        let before = state.samples.len();
        state
            .samples
            .retain(|sample| now.saturating_sub(sample.at) <= retention);
        before - state.samples.len()
    }

    fn suspend(&self, now: u64, until: u64) {
        let fresh = {
            let mut state = self.lock_state();
            let fresh = state.suspended_until.map_or(true, |end| now >= end);
            if fresh {
                state.suspensions += 1;
            }
            state.suspended_until = Some(state.suspended_until.map_or(until, |end| end.max(until)));
            fresh
        };

        match &self.throttle {
            Some(throttle) => throttle.suspend_non_critical(until),
            None if fresh => warn!("emergency pressure but no work throttle attached"),
            None => {}
        }
        if fresh {
            warn!(until_ms = until, "non-critical work suspended");
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().expect("monitor lock poisoned")
    }
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("level", &self.level())
            .field("config", &self.config)
            .field("liveness", &self.liveness.is_some())
            .field("throttle", &self.throttle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PressureThresholds;
    use crate::source::{FixedUsage, ScriptedUsage};
    use keel_cache::Namespace;
    use keel_liveness::HandleMetadata;
    use keel_types::ManualClock;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingThrottle {
        calls: Mutex<Vec<u64>>,
    }

    impl WorkThrottle for RecordingThrottle {
        fn suspend_non_critical(&self, until_ms: u64) {
            self.calls.lock().unwrap().push(until_ms);
        }

        fn resume(&self) {
            self.calls.lock().unwrap().clear();
        }

        fn suspended_until(&self) -> Option<u64> {
            self.calls.lock().unwrap().last().copied()
        }
    }

    struct Harness {
        clock: ManualClock,
        usage: Arc<FixedUsage>,
        cache: Arc<CacheStore>,
        images: Namespace<u32, String>,
        monitor: ResourceMonitor,
    }

    fn harness(initial: f64) -> Harness {
        let clock = ManualClock::new(0);
        let usage = Arc::new(FixedUsage::new(initial));
        let cache = Arc::new(CacheStore::new(clock.shared()));
        let images = cache
            .create_namespace::<u32, String>("images", 100, Duration::from_secs(60))
            .unwrap();
        let monitor = ResourceMonitor::new(
            MonitorConfig::default(),
            clock.shared(),
            usage.clone(),
            cache.clone(),
        )
        .unwrap();
        Harness {
            clock,
            usage,
            cache,
            images,
            monitor,
        }
    }

    fn fill(ns: &Namespace<u32, String>, n: u32) {
        for i in 0..n {
            ns.set(i, format!("value-{i}"));
        }
    }

    // --- Construction ---

    #[test]
    fn invalid_thresholds_rejected() {
        let clock = ManualClock::new(0);
        let config = MonitorConfig {
            thresholds: PressureThresholds {
                warning: 90.0,
                critical: 80.0,
                emergency: 95.0,
            },
            ..Default::default()
        };
        let result = ResourceMonitor::new(
            config,
            clock.shared(),
            Arc::new(FixedUsage::new(0.0)),
            Arc::new(CacheStore::new(clock.shared())),
        );
        assert!(matches!(result, Err(MonitorError::InvalidThresholds(_))));
    }

    // --- Classification and actions ---

    #[test]
    fn normal_usage_takes_no_action() {
        let h = harness(40.0);
        fill(&h.images, 10);
        let report = h.monitor.tick().unwrap();
        assert_eq!(report.level, PressureLevel::Normal);
        assert_eq!(report.actions, ActionReport::default());
        assert_eq!(h.images.len(), 10);
    }

    #[test]
    fn warning_sweeps_expired_only() {
        let h = harness(72.0);
        fill(&h.images, 4);
        h.clock.advance(Duration::from_secs(61));
        h.images.set(99, "fresh".into());

        let report = h.monitor.tick().unwrap();
        assert_eq!(report.level, PressureLevel::Warning);
        assert_eq!(report.actions.expired_evicted, 4);
        assert_eq!(report.actions.lru_evicted, 0);
        assert_eq!(h.images.len(), 1);
        assert!(h.images.contains(&99));
    }

    #[test]
    fn critical_evicts_a_quarter_of_each_namespace() {
        let h = harness(88.0);
        fill(&h.images, 8);
        let report = h.monitor.tick().unwrap();
        assert_eq!(report.level, PressureLevel::Critical);
        assert_eq!(report.actions.lru_evicted, 2);
        assert_eq!(h.images.len(), 6);
        assert!(!h.images.contains(&0));
        assert!(!h.images.contains(&1));
        assert!(report.actions.suspended_until.is_none());
    }

    #[test]
    fn emergency_reached_directly_from_normal() {
        let h = harness(40.0);
        let throttle = Arc::new(RecordingThrottle::default());
        let monitor = ResourceMonitor::new(
            MonitorConfig::default(),
            h.clock.shared(),
            h.usage.clone(),
            h.cache.clone(),
        )
        .unwrap()
        .with_throttle(throttle.clone());

        fill(&h.images, 8);
        assert_eq!(monitor.tick().unwrap().level, PressureLevel::Normal);

        h.usage.set(96.0);
        let report = monitor.tick().unwrap();
        assert_eq!(report.previous, PressureLevel::Normal);
        assert_eq!(report.level, PressureLevel::Emergency);
        assert_eq!(report.actions.lru_evicted, 2);
        assert_eq!(report.actions.suspended_until, Some(30_000));
        assert_eq!(throttle.suspended_until(), Some(30_000));
        assert_eq!(monitor.metrics().suspensions, 1);
    }

    #[test]
    fn actions_repeat_while_elevated() {
        let h = harness(88.0);
        fill(&h.images, 8);
        h.monitor.tick().unwrap();
        h.monitor.tick().unwrap();
        // 8 -> 6 -> 4
        assert_eq!(h.images.len(), 4);
        let metrics = h.monitor.metrics();
        assert_eq!(metrics.lru_evicted, 4);
        assert_eq!(metrics.level_changes, 1);
    }

    #[test]
    fn repeated_emergency_extends_one_suspension() {
        let h = harness(97.0);
        h.monitor.tick().unwrap();
        h.clock.advance(Duration::from_secs(2));
        let report = h.monitor.tick().unwrap();
        assert_eq!(report.actions.suspended_until, Some(32_000));
        assert_eq!(h.monitor.metrics().suspensions, 1);

        h.clock.advance(Duration::from_secs(40));
        h.monitor.tick().unwrap();
        assert_eq!(h.monitor.metrics().suspensions, 2);
    }

    #[test]
    fn unbounded_cooldown_saturates() {
        let h = harness(99.0);
        h.clock.set(5_000);
        let config = MonitorConfig {
            emergency_cooldown_ms: u64::MAX,
            ..Default::default()
        };
        let monitor = ResourceMonitor::new(config, h.clock.shared(), h.usage.clone(), h.cache.clone()).unwrap();

        let report = monitor.tick().unwrap();
        assert_eq!(report.actions.suspended_until, Some(u64::MAX));
        h.clock.advance(Duration::from_secs(3_600));
        monitor.tick().unwrap();
        assert_eq!(monitor.metrics().suspensions, 1);
    }

    #[test]
    fn warning_prunes_dead_handles() {
        let h = harness(75.0);
        let registry = Arc::new(LivenessRegistry::new(h.clock.shared()));
        let monitor = ResourceMonitor::new(
            MonitorConfig::default(),
            h.clock.shared(),
            h.usage.clone(),
            h.cache.clone(),
        )
        .unwrap()
        .with_liveness(registry.clone());

        let kept = Arc::new(1u8);
        registry.register(&kept, HandleMetadata::new("screen"));
        {
            let dropped = Arc::new(2u8);
            registry.register(&dropped, HandleMetadata::new("screen"));
        }

        let report = monitor.tick().unwrap();
        assert_eq!(report.actions.handles_pruned, 1);
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn warning_prunes_old_metric_samples() {
        let h = harness(10.0);
        h.monitor.tick().unwrap();
        h.clock.advance(Duration::from_secs(6 * 60));
        h.usage.set(71.0);
        let report = h.monitor.tick().unwrap();
        assert_eq!(report.actions.metrics_pruned, 1);
        let metrics = h.monitor.metrics();
        assert_eq!(metrics.samples.len(), 1);
        assert_eq!(metrics.samples[0].level, PressureLevel::Warning);
    }

    // --- Readings ---

    #[test]
    fn reported_usage_is_consumed_on_next_tick() {
        let h = harness(10.0);
        h.monitor.report_usage(90.0).unwrap();
        assert_eq!(h.monitor.level(), PressureLevel::Normal);

        assert_eq!(h.monitor.tick().unwrap().level, PressureLevel::Critical);
        // Back to the source afterwards.
        assert_eq!(h.monitor.tick().unwrap().level, PressureLevel::Normal);
    }

    #[test]
    fn non_finite_report_rejected() {
        let h = harness(10.0);
        assert!(matches!(
            h.monitor.report_usage(f64::NAN),
            Err(MonitorError::InvalidSample(_))
        ));
    }

    #[test]
    fn failed_sample_keeps_level() {
        let clock = ManualClock::new(0);
        let cache = Arc::new(CacheStore::new(clock.shared()));
        let monitor = ResourceMonitor::new(
            MonitorConfig::default(),
            clock.shared(),
            Arc::new(ScriptedUsage::new(Vec::<f64>::new())),
            cache,
        )
        .unwrap();

        assert!(monitor.tick().is_err());
        assert_eq!(monitor.level(), PressureLevel::Normal);
        let metrics = monitor.metrics();
        assert_eq!(metrics.failed_samples, 1);
        assert_eq!(metrics.samples_taken, 0);
    }

    #[test]
    fn sample_history_is_capped() {
        let clock = ManualClock::new(0);
        let config = MonitorConfig {
            max_samples: 3,
            ..Default::default()
        };
        let monitor = ResourceMonitor::new(
            config,
            clock.shared(),
            Arc::new(FixedUsage::new(5.0)),
            Arc::new(CacheStore::new(clock.shared())),
        )
        .unwrap();
        for _ in 0..5 {
            monitor.tick().unwrap();
        }
        let metrics = monitor.metrics();
        assert_eq!(metrics.samples.len(), 3);
        assert_eq!(metrics.samples_taken, 5);
    }

    // --- Notifications and the loop ---

    #[test]
    fn subscribers_see_only_changes() {
        let h = harness(40.0);
        let rx = h.monitor.subscribe();
        h.monitor.tick().unwrap();
        assert!(!rx.has_changed().unwrap());

        h.usage.set(86.0);
        h.monitor.tick().unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), PressureLevel::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_samples_until_shutdown() {
        let h = harness(96.0);
        let monitor = Arc::new(h.monitor);
        let mut levels = monitor.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(Arc::clone(&monitor).run(stop_rx));
        levels.changed().await.unwrap();
        assert_eq!(*levels.borrow(), PressureLevel::Emergency);

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert!(monitor.metrics().samples_taken >= 3);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }
}

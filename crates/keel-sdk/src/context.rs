use std::fmt::Debug;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use keel_batch::{Merge, OrderedBatchStore};
use keel_cache::CacheStore;
use keel_liveness::LivenessRegistry;
use keel_monitor::{FixedUsage, ResourceMonitor, UsageSource, WorkThrottle};
use keel_optimistic::OptimisticLedger;
use keel_ops::OperationTracker;
use keel_types::{system_clock, SharedClock};

use crate::background::BackgroundTasks;
use crate::config::KeelConfig;
use crate::error::SdkResult;

/// Builder for [`Keel`].
pub struct KeelBuilder {
    config: KeelConfig,
    clock: Option<SharedClock>,
    source: Option<Arc<dyn UsageSource>>,
}

impl KeelBuilder {
    /// Use `clock` instead of the system clock.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sample usage from `source`. Without one the monitor reads 0% and
    /// relies on [`ResourceMonitor::report_usage`].
    pub fn usage_source(mut self, source: Arc<dyn UsageSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Validate the configuration and wire every subsystem.
    pub fn build(self) -> SdkResult<Keel> {
        let config = self.config;
        config.validate()?;
        let clock = self.clock.unwrap_or_else(system_clock);
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(FixedUsage::new(0.0)) as Arc<dyn UsageSource>);

        let cache = Arc::new(CacheStore::with_defaults(Arc::clone(&clock), config.cache.clone()));
        let liveness = Arc::new(LivenessRegistry::new(Arc::clone(&clock)));

        let results = cache.create_namespace(
            &config.tracker.result_namespace,
            config.tracker.result_cache_size,
            config.tracker.result_cache_ttl(),
        )?;
        let tracker = Arc::new(
            OperationTracker::new(config.tracker.clone(), Arc::clone(&clock))?
                .with_result_cache(results),
        );

        let throttle: Arc<dyn WorkThrottle> = tracker.clone();
        let monitor = Arc::new(
            ResourceMonitor::new(
                config.monitor.clone(),
                Arc::clone(&clock),
                source,
                Arc::clone(&cache),
            )?
            .with_liveness(Arc::clone(&liveness))
            .with_throttle(throttle),
        );

        info!(
            sample_interval_ms = config.monitor.sample_interval_ms,
            retention_ms = config.tracker.retention_ms,
            "keel context built"
        );
        Ok(Keel {
            config,
            clock,
            cache,
            liveness,
            monitor,
            tracker,
        })
    }
}

/// The application-wide Keel context.
///
/// Construct it once and share it; every accessor hands out a cheap handle.
pub struct Keel {
    config: KeelConfig,
    clock: SharedClock,
    cache: Arc<CacheStore>,
    liveness: Arc<LivenessRegistry>,
    monitor: Arc<ResourceMonitor>,
    tracker: Arc<OperationTracker>,
}

impl Keel {
    pub fn builder(config: KeelConfig) -> KeelBuilder {
        KeelBuilder {
            config,
            clock: None,
            source: None,
        }
    }

    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn liveness(&self) -> &Arc<LivenessRegistry> {
        &self.liveness
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }

    /// A new batch store for one collection, using the configured debounce.
    pub fn batch_store<I, P>(&self, name: &str) -> SdkResult<OrderedBatchStore<I, P>>
    where
        I: Ord + Clone + Debug + Send + Sync + 'static,
        P: Merge + Clone + Send + Sync + 'static,
    {
        Ok(OrderedBatchStore::new(name, &self.config.batch, Arc::clone(&self.clock))?)
    }

    /// A new optimistic ledger in front of a fresh batch store for `name`.
    pub fn ledger<I, P>(&self, name: &str) -> SdkResult<OptimisticLedger<I, P>>
    where
        I: Ord + Clone + Debug + Send + Sync + 'static,
        P: Merge + Clone + Send + Sync + 'static,
    {
        let store = self.batch_store(name)?;
        Ok(OptimisticLedger::new(store, Arc::clone(&self.clock)))
    }

    /// Start the monitor loop and the retention sweep on the current tokio
    /// runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn_background(&self) -> BackgroundTasks {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = BackgroundTasks::new(shutdown_tx);
        tasks.push(
            "resource-monitor",
            tokio::spawn(Arc::clone(&self.monitor).run(shutdown_rx.clone())),
        );
        tasks.push(
            "retention-sweep",
            tokio::spawn(Arc::clone(&self.tracker).run_sweeper(shutdown_rx)),
        );
        tasks
    }
}

impl std::fmt::Debug for Keel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keel")
            .field("cache", &self.cache)
            .field("monitor", &self.monitor)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

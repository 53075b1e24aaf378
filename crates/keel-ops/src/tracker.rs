use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use keel_cache::Namespace;
use keel_monitor::WorkThrottle;
use keel_types::{OperationId, SharedClock};

use crate::cancel::CancelToken;
use crate::config::TrackerConfig;
use crate::error::{OpsError, OpsResult};
use crate::operation::{
    Operation, OperationCallback, OperationEvent, OperationKind, OperationStatus, StartOptions,
};
use crate::pipeline::{Pipeline, StepContext};

struct Tracked {
    op: Operation,
    token: CancelToken,
    subscriber: Option<OperationCallback>,
    /// Live `drive` calls; while non-zero they own the checkpoints.
    drivers: usize,
}

/// Registry of long-running operations.
///
/// Hosts either report progress themselves (`update_progress`, `complete`,
/// `fail`) or hand the tracker a [`Pipeline`] to [`drive`](Self::drive).
/// The tracker also acts as the monitor's [`WorkThrottle`]: during an
/// emergency suspension non-critical pipelines wait at their next
/// checkpoint.
pub struct OperationTracker {
    config: TrackerConfig,
    clock: SharedClock,
    results: Option<Namespace<String, Value>>,
    ops: RwLock<BTreeMap<OperationId, Tracked>>,
    suspended_until: Mutex<Option<u64>>,
    resumed: Notify,
}

impl OperationTracker {
    pub fn new(config: TrackerConfig, clock: SharedClock) -> OpsResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            results: None,
            ops: RwLock::new(BTreeMap::new()),
            suspended_until: Mutex::new(None),
            resumed: Notify::new(),
        })
    }

    /// Memoise completed results keyed by [`StartOptions::cache_key`].
    pub fn with_result_cache(mut self, results: Namespace<String, Value>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Register a new operation in `Starting`.
    ///
    /// If `options.cache_key` has a cached result the operation is created
    /// already Completed with that result.
    pub fn start(&self, kind: OperationKind, subject: impl Into<String>, options: StartOptions) -> Operation {
        let now = self.clock.now_ms();
        let id = OperationId::new();
        let cached = options
            .cache_key
            .as_ref()
            .and_then(|key| self.results.as_ref()?.get(key));

        let mut op = Operation {
            id,
            kind,
            subject: subject.into(),
            progress: 0.0,
            status: OperationStatus::Starting,
            cancel_requested: false,
            critical: options.critical,
            cache_key: options.cache_key,
            result: None,
            error: None,
            started_at: now,
            finished_at: None,
            purge_at: None,
        };
        if let Some(result) = cached {
            op.progress = 100.0;
            op.status = OperationStatus::Completed;
            op.result = Some(result);
            op.finished_at = Some(now);
            op.purge_at = Some(now.saturating_add(self.config.retention_ms));
            debug!(id = %id.short_id(), key = ?op.cache_key, "operation served from result cache");
        }

        info!(id = %id.short_id(), kind = %op.kind, subject = %op.subject, status = %op.status, "operation started");
        self.write_ops().insert(
            id,
            Tracked {
                op: op.clone(),
                token: CancelToken::new(),
                subscriber: None,
                drivers: 0,
            },
        );
        op
    }

    /// Set the operation's single subscriber, replacing any previous one.
    pub fn subscribe<F>(&self, id: OperationId, callback: F) -> OpsResult<()>
    where
        F: Fn(&OperationEvent) + Send + Sync + 'static,
    {
        let mut ops = self.write_ops();
        let tracked = ops.get_mut(&id).ok_or(OpsError::NotFound(id))?;
        tracked.subscriber = Some(Arc::new(callback));
        Ok(())
    }

    /// Remove the subscriber. Returns whether one was set.
    pub fn unsubscribe(&self, id: OperationId) -> OpsResult<bool> {
        let mut ops = self.write_ops();
        let tracked = ops.get_mut(&id).ok_or(OpsError::NotFound(id))?;
        Ok(tracked.subscriber.take().is_some())
    }

    /// The operation's cancellation token.
    pub fn token(&self, id: OperationId) -> OpsResult<CancelToken> {
        self.read_tracked(id, |tracked| tracked.token.clone())
    }

    /// Record progress, clamped to [0, 100].
    ///
    /// Returns `false` without notifying when the operation is terminal.
    /// A pending cancellation is observed here: the operation becomes
    /// Cancelled, the subscriber gets the cancellation instead of the
    /// progress, and `false` is returned.
    pub fn update_progress(&self, id: OperationId, percent: f64) -> OpsResult<bool> {
        let (callback, event) = {
            let mut ops = self.write_ops();
            let tracked = ops.get_mut(&id).ok_or(OpsError::NotFound(id))?;
            if tracked.op.is_terminal() {
                return Ok(false);
            }
            if tracked.token.is_cancelled() {
                (self.finish(tracked, OperationStatus::Cancelled), OperationEvent::Cancelled { id })
            } else {
                if !percent.is_nan() {
                    tracked.op.progress = percent.clamp(0.0, 100.0);
                }
                tracked.op.status = OperationStatus::InProgress;
                let progress = tracked.op.progress;
                (tracked.subscriber.clone(), OperationEvent::Progress { id, progress })
            }
        };

        let applied = !event.is_terminal();
        if !applied {
            info!(id = %id.short_id(), "operation cancelled at progress checkpoint");
        }
        notify(callback, &event);
        Ok(applied)
    }

    /// Request cancellation.
    ///
    /// While a pipeline drives the operation the flag is only set and the
    /// pipeline stops at its next checkpoint. Otherwise this call is the
    /// checkpoint and the operation is Cancelled immediately. Returns
    /// `false` if the operation was already terminal or already asked to
    /// cancel.
    pub fn cancel(&self, id: OperationId) -> OpsResult<bool> {
        let (first, transition) = {
            let mut ops = self.write_ops();
            let tracked = ops.get_mut(&id).ok_or(OpsError::NotFound(id))?;
            if tracked.op.is_terminal() {
                return Ok(false);
            }
            tracked.op.cancel_requested = true;
            let first = tracked.token.cancel();
            if tracked.drivers > 0 {
                (first, None)
            } else {
                (first, Some(self.finish(tracked, OperationStatus::Cancelled)))
            }
        };

        match transition {
            Some(callback) => {
                info!(id = %id.short_id(), "operation cancelled");
                notify(callback, &OperationEvent::Cancelled { id });
            }
            None if first => debug!(id = %id.short_id(), "cancellation requested; waiting for checkpoint"),
            None => {}
        }
        Ok(first)
    }

    /// Cooperative checkpoint. Observes a pending cancellation and returns
    /// [`OpsError::Cancelled`]; errors with [`OpsError::Finished`] for other
    /// terminal states.
    pub fn checkpoint(&self, id: OperationId) -> OpsResult<()> {
        let callback = {
            let mut ops = self.write_ops();
            let tracked = ops.get_mut(&id).ok_or(OpsError::NotFound(id))?;
            match tracked.op.status {
                OperationStatus::Cancelled => return Err(OpsError::Cancelled(id)),
                status if status.is_terminal() => return Err(OpsError::Finished { id, status }),
                _ => {}
            }
            if !tracked.token.is_cancelled() {
                return Ok(());
            }
            self.finish(tracked, OperationStatus::Cancelled)
        };

        info!(id = %id.short_id(), "operation cancelled at checkpoint");
        notify(callback, &OperationEvent::Cancelled { id });
        Err(OpsError::Cancelled(id))
    }

    /// Mark the operation Completed with `result`. Returns `false` if it was
    /// already terminal, or if a pending cancellation wins instead.
    pub fn complete(&self, id: OperationId, result: Value) -> OpsResult<bool> {
        let (callback, event, memo) = {
            let mut ops = self.write_ops();
            let tracked = ops.get_mut(&id).ok_or(OpsError::NotFound(id))?;
            if tracked.op.is_terminal() {
                return Ok(false);
            }
            if tracked.token.is_cancelled() {
                (self.finish(tracked, OperationStatus::Cancelled), OperationEvent::Cancelled { id }, None)
            } else {
                tracked.op.progress = 100.0;
                tracked.op.result = Some(result.clone());
                let memo = tracked.op.cache_key.clone();
                (
                    self.finish(tracked, OperationStatus::Completed),
                    OperationEvent::Completed { id, result },
                    memo,
                )
            }
        };

        if let OperationEvent::Completed { result, .. } = &event {
            if let (Some(results), Some(key)) = (&self.results, memo) {
                results.set(key, result.clone());
            }
            info!(id = %id.short_id(), "operation completed");
        }
        let completed = matches!(event, OperationEvent::Completed { .. });
        notify(callback, &event);
        Ok(completed)
    }

    /// Mark the operation Failed. The tracker never retries. Returns `false`
    /// if it was already terminal, or if a pending cancellation wins instead.
    pub fn fail(&self, id: OperationId, error: impl Into<String>) -> OpsResult<bool> {
        let error = error.into();
        let (callback, event) = {
            let mut ops = self.write_ops();
            let tracked = ops.get_mut(&id).ok_or(OpsError::NotFound(id))?;
            if tracked.op.is_terminal() {
                return Ok(false);
            }
            if tracked.token.is_cancelled() {
                (self.finish(tracked, OperationStatus::Cancelled), OperationEvent::Cancelled { id })
            } else {
                tracked.op.error = Some(error.clone());
                (
                    self.finish(tracked, OperationStatus::Failed),
                    OperationEvent::Failed { id, error },
                )
            }
        };

        let failed = matches!(event, OperationEvent::Failed { .. });
        if let OperationEvent::Failed { error, .. } = &event {
            warn!(id = %id.short_id(), error = %error, "operation failed");
        }
        notify(callback, &event);
        Ok(failed)
    }

    /// Run `pipeline` for the operation and complete it with the last step's
    /// output.
    ///
    /// Before each step the tracker waits out any emergency suspension
    /// (unless the operation is critical) and checks for cancellation. After
    /// each step progress advances by the step's share of the total weight
    /// and the task yields.
    pub async fn drive(&self, id: OperationId, pipeline: Pipeline) -> OpsResult<Value> {
        let (token, critical) = {
            let mut ops = self.write_ops();
            let tracked = ops.get_mut(&id).ok_or(OpsError::NotFound(id))?;
            match tracked.op.status {
                OperationStatus::Cancelled => return Err(OpsError::Cancelled(id)),
                status if status.is_terminal() => return Err(OpsError::Finished { id, status }),
                _ => {}
            }
            tracked.drivers += 1;
            (tracked.token.clone(), tracked.op.critical)
        };
        let _driver = DriverGuard { tracker: self, id };
        debug!(id = %id.short_id(), steps = pipeline.len(), critical, "driving operation");

        let mut done = 0.0;
        let mut output = Value::Null;
        for (index, weighted) in pipeline.steps.iter().enumerate() {
            if !critical {
                self.wait_while_suspended(&token).await;
            }
            self.checkpoint(id)?;

            let ctx = StepContext {
                operation: id,
                index,
                input: std::mem::take(&mut output),
                token: token.clone(),
            };
            match weighted.step.run(ctx).await {
                Ok(value) => output = value,
                Err(e) => {
                    let step = weighted.step.name().to_string();
                    if self.fail(id, format!("{step}: {e}"))? {
                        return Err(OpsError::Failed {
                            id,
                            step,
                            message: e.to_string(),
                        });
                    }
                    return Err(self.terminal_error(id));
                }
            }

            done += weighted.weight;
            self.update_progress(id, pipeline.percent(done))?;
            tokio::task::yield_now().await;
        }

        self.checkpoint(id)?;
        if self.complete(id, output.clone())? {
            Ok(output)
        } else {
            Err(self.terminal_error(id))
        }
    }

    pub fn get(&self, id: OperationId) -> Option<Operation> {
        self.read_tracked(id, |tracked| tracked.op.clone()).ok()
    }

    /// All tracked operations, oldest first.
    pub fn list(&self) -> Vec<Operation> {
        self.ops
            .read()
            .expect("operations lock poisoned")
            .values()
            .map(|tracked| tracked.op.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ops.read().expect("operations lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether non-critical work is currently suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspension_remaining().is_some()
    }

    /// Drop operations whose retention window has passed. Purging releases
    /// their subscriber and cancellation token.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut ops = self.write_ops();
        let before = ops.len();
        ops.retain(|_, tracked| !tracked.op.purge_at.is_some_and(|at| now >= at));
        let purged = before - ops.len();
        if purged > 0 {
            debug!(purged, remaining = ops.len(), "finished operations purged");
        }
        purged
    }

    /// Sweep on the configured interval until `shutdown` flips to `true` or
    /// its sender is dropped.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.config.sweep_interval_ms, "operation retention sweep started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("operation retention sweep stopped");
    }

    /// Called when a `drive` call ends or its future is dropped. The last
    /// driver to leave settles a cancellation no checkpoint observed.
    fn release_driver(&self, id: OperationId) {
        let callback = {
            // May run while unwinding; a poisoned lock is left alone.
            let Ok(mut ops) = self.ops.write() else {
                return;
            };
            let Some(tracked) = ops.get_mut(&id) else {
                return;
            };
            tracked.drivers = tracked.drivers.saturating_sub(1);
            if tracked.drivers > 0 || tracked.op.is_terminal() || !tracked.token.is_cancelled() {
                return;
            }
            self.finish(tracked, OperationStatus::Cancelled)
        };

        info!(id = %id.short_id(), "operation cancelled after its driver stopped");
        notify(callback, &OperationEvent::Cancelled { id });
    }

    fn finish(&self, tracked: &mut Tracked, status: OperationStatus) -> Option<OperationCallback> {
        let now = self.clock.now_ms();
        tracked.op.status = status;
        tracked.op.finished_at = Some(now);
        tracked.op.purge_at = Some(now.saturating_add(self.config.retention_ms));
        tracked.subscriber.clone()
    }

    fn terminal_error(&self, id: OperationId) -> OpsError {
        match self.get(id).map(|op| op.status) {
            None => OpsError::NotFound(id),
            Some(OperationStatus::Cancelled) => OpsError::Cancelled(id),
            Some(status) => OpsError::Finished { id, status },
        }
    }

    async fn wait_while_suspended(&self, token: &CancelToken) {
        loop {
            let resumed = self.resumed.notified();
            let Some(remaining) = self.suspension_remaining() else {
                return;
            };
            if token.is_cancelled() {
                return;
            }
            debug!(remaining_ms = remaining.as_millis() as u64, "operation waiting out suspension");
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = resumed => {}
                _ = token.cancelled() => {}
            }
        }
    }

    fn suspension_remaining(&self) -> Option<Duration> {
        let mut until = self.suspended_until.lock().expect("suspension lock poisoned");
        let end = (*until)?;
        let now = self.clock.now_ms();
        if now < end {
            return Some(Duration::from_millis(end - now));
        }
        *until = None;
        info!("non-critical work resumed after cooldown");
        None
    }

    fn read_tracked<T>(&self, id: OperationId, f: impl FnOnce(&Tracked) -> T) -> OpsResult<T> {
        self.ops
            .read()
            .expect("operations lock poisoned")
            .get(&id)
            .map(f)
            .ok_or(OpsError::NotFound(id))
    }

    fn write_ops(&self) -> RwLockWriteGuard<'_, BTreeMap<OperationId, Tracked>> {
        self.ops.write().expect("operations lock poisoned")
    }
}

/// Releases a `drive` call's claim on its operation, including when the
/// future is dropped mid-step.
struct DriverGuard<'a> {
    tracker: &'a OperationTracker,
    id: OperationId,
}

impl Drop for DriverGuard<'_> {
    fn drop(&mut self) {
        self.tracker.release_driver(self.id);
    }
}

impl WorkThrottle for OperationTracker {
    fn suspend_non_critical(&self, until_ms: u64) {
        let mut until = self.suspended_until.lock().expect("suspension lock poisoned");
        match *until {
            Some(end) if end >= until_ms => {}
            Some(_) => *until = Some(until_ms),
            None => {
                *until = Some(until_ms);
                info!(until_ms, "non-critical operations suspended");
            }
        }
    }

    fn resume(&self) {
        let was = self
            .suspended_until
            .lock()
            .expect("suspension lock poisoned")
            .take();
        if was.is_some() {
            info!("non-critical operations resumed");
        }
        self.resumed.notify_waiters();
    }

    fn suspended_until(&self) -> Option<u64> {
        let until = (*self.suspended_until.lock().expect("suspension lock poisoned"))?;
        (self.clock.now_ms() < until).then_some(until)
    }
}

impl std::fmt::Debug for OperationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationTracker")
            .field("operations", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn notify(callback: Option<OperationCallback>, event: &OperationEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FnStep, StepError};
    use keel_cache::CacheStore;
    use keel_types::ManualClock;
    use serde_json::json;

    fn tracker(clock: &ManualClock) -> Arc<OperationTracker> {
        Arc::new(OperationTracker::new(TrackerConfig::default(), clock.shared()).unwrap())
    }

    fn record_events(tracker: &OperationTracker, id: OperationId) -> Arc<Mutex<Vec<OperationEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        tracker
            .subscribe(id, move |event| sink.lock().unwrap().push(event.clone()))
            .unwrap();
        events
    }

    fn step(name: &str, output: Value) -> FnStep<impl Fn(StepContext) -> std::future::Ready<Result<Value, StepError>>> {
        FnStep::new(name, move |_ctx: StepContext| std::future::ready(Ok(output.clone())))
    }

    // --- Lifecycle ---

    #[test]
    fn start_registers_starting_operation() {
        let clock = ManualClock::new(5);
        let tracker = tracker(&clock);
        let op = tracker.start(OperationKind::Upload, "avatar.png", StartOptions::default());
        assert_eq!(op.status, OperationStatus::Starting);
        assert_eq!(op.started_at, 5);
        assert_eq!(tracker.get(op.id).unwrap(), op);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn progress_is_clamped_and_moves_to_in_progress() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Download, "a", StartOptions::default()).id;
        let events = record_events(&tracker, id);

        assert!(tracker.update_progress(id, 150.0).unwrap());
        assert_eq!(tracker.get(id).unwrap().progress, 100.0);
        assert!(tracker.update_progress(id, -3.0).unwrap());
        let op = tracker.get(id).unwrap();
        assert_eq!(op.progress, 0.0);
        assert_eq!(op.status, OperationStatus::InProgress);
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn complete_and_fail_are_final() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Upload, "a", StartOptions::default()).id;
        let events = record_events(&tracker, id);

        assert!(tracker.complete(id, json!({"url": "x"})).unwrap());
        assert!(!tracker.complete(id, json!(null)).unwrap());
        assert!(!tracker.fail(id, "late").unwrap());
        assert!(!tracker.update_progress(id, 50.0).unwrap());

        let op = tracker.get(id).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.result, Some(json!({"url": "x"})));
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn fail_records_error() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Upload, "a", StartOptions::default()).id;
        assert!(tracker.fail(id, "connection reset").unwrap());
        let op = tracker.get(id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.error.as_deref(), Some("connection reset"));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = OperationId::new();
        assert_eq!(tracker.update_progress(id, 1.0), Err(OpsError::NotFound(id)));
        assert_eq!(tracker.cancel(id), Err(OpsError::NotFound(id)));
        assert!(tracker.get(id).is_none());
    }

    #[test]
    fn unsubscribe_stops_events() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Upload, "a", StartOptions::default()).id;
        let events = record_events(&tracker, id);
        tracker.update_progress(id, 10.0).unwrap();
        assert!(tracker.unsubscribe(id).unwrap());
        tracker.update_progress(id, 20.0).unwrap();
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    // --- Cancellation ---

    #[test]
    fn cancel_without_pipeline_is_immediate() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Upload, "a", StartOptions::default()).id;
        let events = record_events(&tracker, id);
        tracker.update_progress(id, 50.0).unwrap();

        assert!(tracker.cancel(id).unwrap());
        assert!(!tracker.cancel(id).unwrap());
        assert_eq!(tracker.get(id).unwrap().status, OperationStatus::Cancelled);
        assert!(!tracker.update_progress(id, 75.0).unwrap());
        assert_eq!(tracker.checkpoint(id), Err(OpsError::Cancelled(id)));
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                OperationEvent::Progress { id, progress: 50.0 },
                OperationEvent::Cancelled { id },
            ]
        );
    }

    #[test]
    fn checkpoint_passes_when_not_cancelled() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Upload, "a", StartOptions::default()).id;
        assert!(tracker.checkpoint(id).is_ok());
        tracker.complete(id, json!(1)).unwrap();
        assert!(matches!(tracker.checkpoint(id), Err(OpsError::Finished { .. })));
    }

    #[tokio::test]
    async fn cancel_during_step_takes_effect_at_next_checkpoint() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Upload, "video.mp4", StartOptions::default()).id;
        let events = record_events(&tracker, id);

        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let pipeline = {
            let started = Arc::clone(&started);
            let gate = Arc::clone(&gate);
            Pipeline::new()
                .step(
                    1.0,
                    FnStep::new("transfer", move |_ctx: StepContext| {
                        let started = Arc::clone(&started);
                        let gate = Arc::clone(&gate);
                        async move {
                            started.notify_one();
                            gate.notified().await;
                            Ok::<_, StepError>(json!("chunk"))
                        }
                    }),
                )
                .step(1.0, step("finalize", json!("done")))
        };

        let driver = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.drive(id, pipeline).await })
        };
        started.notified().await;

        assert!(tracker.cancel(id).unwrap());
        let op = tracker.get(id).unwrap();
        assert!(op.cancel_requested);
        assert!(!op.is_terminal());

        gate.notify_one();
        assert_eq!(driver.await.unwrap(), Err(OpsError::Cancelled(id)));
        assert_eq!(tracker.get(id).unwrap().status, OperationStatus::Cancelled);
        assert_eq!(*events.lock().unwrap(), vec![OperationEvent::Cancelled { id }]);
    }

    fn stalled_pipeline() -> Pipeline {
        Pipeline::new().step(
            1.0,
            FnStep::new("stall", |_ctx: StepContext| {
                std::future::pending::<Result<Value, StepError>>()
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_drive_is_dropped_is_immediate() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Download, "archive.zip", StartOptions::default()).id;
        let events = record_events(&tracker, id);

        let timed_out = tokio::time::timeout(Duration::from_millis(5), tracker.drive(id, stalled_pipeline())).await;
        assert!(timed_out.is_err());
        assert!(!tracker.get(id).unwrap().is_terminal());

        assert!(tracker.cancel(id).unwrap());
        let op = tracker.get(id).unwrap();
        assert_eq!(op.status, OperationStatus::Cancelled);
        assert_eq!(op.purge_at, Some(300_000));
        assert_eq!(*events.lock().unwrap(), vec![OperationEvent::Cancelled { id }]);

        clock.set(300_000);
        assert_eq!(tracker.sweep(), 1);
        assert!(tracker.get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_drive_settles_pending_cancel() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Upload, "backup.tar", StartOptions::default()).id;
        let events = record_events(&tracker, id);

        let driver = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.drive(id, stalled_pipeline()).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(tracker.cancel(id).unwrap());
        assert!(!tracker.get(id).unwrap().is_terminal());

        driver.abort();
        assert!(driver.await.unwrap_err().is_cancelled());
        assert_eq!(tracker.get(id).unwrap().status, OperationStatus::Cancelled);
        assert_eq!(*events.lock().unwrap(), vec![OperationEvent::Cancelled { id }]);
    }

    // --- Pipelines ---

    #[tokio::test]
    async fn drive_reports_weighted_progress_and_completes() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Download, "report.pdf", StartOptions::default()).id;
        let events = record_events(&tracker, id);

        let pipeline = Pipeline::new()
            .step(1.0, step("resolve", json!("url")))
            .step(3.0, step("fetch", json!({"bytes": 42})));
        let result = tracker.drive(id, pipeline).await.unwrap();

        assert_eq!(result, json!({"bytes": 42}));
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                OperationEvent::Progress { id, progress: 25.0 },
                OperationEvent::Progress { id, progress: 100.0 },
                OperationEvent::Completed { id, result: json!({"bytes": 42}) },
            ]
        );
    }

    #[tokio::test]
    async fn step_failure_fails_operation_without_retry() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Upload, "a", StartOptions::default()).id;
        let attempts = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&attempts);
        let pipeline = Pipeline::new().step(
            1.0,
            FnStep::new("upload", move |_ctx: StepContext| {
                *counter.lock().unwrap() += 1;
                std::future::ready(Err::<Value, _>(StepError::new("503")))
            }),
        );

        let err = tracker.drive(id, pipeline).await.unwrap_err();
        assert!(matches!(err, OpsError::Failed { ref step, .. } if step == "upload"));
        assert_eq!(*attempts.lock().unwrap(), 1);
        let op = tracker.get(id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.error.as_deref(), Some("upload: 503"));
    }

    #[tokio::test]
    async fn drive_rejects_finished_operation() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Upload, "a", StartOptions::default()).id;
        tracker.cancel(id).unwrap();
        let result = tracker.drive(id, Pipeline::new()).await;
        assert_eq!(result, Err(OpsError::Cancelled(id)));
    }

    // --- Suspension ---

    #[tokio::test(start_paused = true)]
    async fn suspension_holds_non_critical_pipelines() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        tracker.suspend_non_critical(30_000);
        assert!(tracker.is_suspended());

        let normal = tracker.start(OperationKind::Upload, "bulk", StartOptions::default()).id;
        let urgent = tracker.start(OperationKind::Upload, "receipt", StartOptions::critical()).id;

        let driver = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tracker
                    .drive(normal, Pipeline::new().step(1.0, step("send", json!(1))))
                    .await
            })
        };

        let urgent_result = tracker
            .drive(urgent, Pipeline::new().step(1.0, step("send", json!(2))))
            .await;
        assert_eq!(urgent_result, Ok(json!(2)));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tracker.get(normal).unwrap().status, OperationStatus::Starting);

        tracker.resume();
        assert_eq!(driver.await.unwrap(), Ok(json!(1)));
        assert!(!tracker.is_suspended());
    }

    #[test]
    fn suspension_windows_extend_and_expire() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        tracker.suspend_non_critical(10_000);
        tracker.suspend_non_critical(5_000);
        assert_eq!(tracker.suspended_until(), Some(10_000));
        tracker.suspend_non_critical(20_000);
        assert_eq!(tracker.suspended_until(), Some(20_000));

        clock.set(20_000);
        assert_eq!(tracker.suspended_until(), None);
        assert!(!tracker.is_suspended());
    }

    // --- Result cache ---

    #[test]
    fn cached_result_completes_immediately() {
        let clock = ManualClock::new(0);
        let cache = CacheStore::new(clock.shared());
        let results = cache
            .create_namespace::<String, Value>("operation-results", 10, Duration::from_secs(60))
            .unwrap();
        let tracker = OperationTracker::new(TrackerConfig::default(), clock.shared())
            .unwrap()
            .with_result_cache(results.clone());

        let options = StartOptions::default().with_cache_key("thumb:42");
        let first = tracker.start(OperationKind::Download, "thumb", options.clone());
        assert_eq!(first.status, OperationStatus::Starting);
        tracker.complete(first.id, json!({"path": "/tmp/42"})).unwrap();
        assert!(results.contains(&"thumb:42".to_string()));

        let second = tracker.start(OperationKind::Download, "thumb", options);
        assert_eq!(second.status, OperationStatus::Completed);
        assert_eq!(second.progress, 100.0);
        assert_eq!(second.result, Some(json!({"path": "/tmp/42"})));
    }

    // --- Retention ---

    #[test]
    fn sweep_purges_after_retention() {
        let clock = ManualClock::new(1_000);
        let tracker = tracker(&clock);
        let done = tracker.start(OperationKind::Upload, "a", StartOptions::default()).id;
        let running = tracker.start(OperationKind::Upload, "b", StartOptions::default()).id;
        tracker.complete(done, json!(null)).unwrap();
        assert_eq!(tracker.get(done).unwrap().purge_at, Some(301_000));

        clock.set(300_999);
        assert_eq!(tracker.sweep(), 0);
        clock.set(301_000);
        assert_eq!(tracker.sweep(), 1);
        assert!(tracker.get(done).is_none());
        assert!(tracker.get(running).is_some());
    }

    #[test]
    fn unbounded_retention_keeps_finished_operations() {
        let clock = ManualClock::new(1_000);
        let config = TrackerConfig {
            retention_ms: u64::MAX,
            ..TrackerConfig::default()
        };
        let tracker = OperationTracker::new(config, clock.shared()).unwrap();
        let id = tracker.start(OperationKind::Upload, "a", StartOptions::default()).id;
        assert!(tracker.complete(id, json!(null)).unwrap());
        assert_eq!(tracker.get(id).unwrap().purge_at, Some(u64::MAX));

        clock.set(10_000_000);
        assert_eq!(tracker.sweep(), 0);
        assert!(tracker.get(id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_purges_within_one_interval() {
        let clock = ManualClock::new(0);
        let tracker = tracker(&clock);
        let id = tracker.start(OperationKind::Upload, "a", StartOptions::default()).id;
        tracker.fail(id, "boom").unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let sweeper = tokio::spawn(Arc::clone(&tracker).run_sweeper(stop_rx));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(tracker.get(id).is_some());

        clock.set(300_000);
        tokio::time::sleep(tracker.config().sweep_interval()).await;
        assert!(tracker.get(id).is_none());

        stop_tx.send(true).unwrap();
        sweeper.await.unwrap();
    }
}

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use keel_types::SharedClock;

use crate::config::{BatchConfig, FlushTrigger};
use crate::error::BatchResult;
use crate::merge::Merge;
use crate::mutation::Mutation;
use crate::record::StateRecord;

/// Counts of what one flush did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Mutations drained from the queue.
    pub mutations: usize,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.mutations == 0
    }

    /// Whether any record was added, changed or removed.
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.deleted > 0
    }
}

/// Published after every non-empty flush.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreChanged {
    pub store: String,
    /// Sequence number of the flush, starting at 1.
    pub flush: u64,
    pub report: FlushReport,
}

struct Queue<I, P> {
    mutations: Vec<Mutation<I, P>>,
    /// Epoch of the armed debounce timer, if any.
    armed: Option<u64>,
    next_epoch: u64,
    /// Clock reading at which the queue becomes due for `flush_if_due`.
    due_at: Option<u64>,
}

struct Records<I, P> {
    by_id: BTreeMap<I, StateRecord<I, P>>,
    flushes: u64,
}

struct Inner<I, P> {
    name: String,
    trigger: FlushTrigger,
    debounce_ms: u64,
    clock: SharedClock,
    // Lock order: records, then queue.
    records: RwLock<Records<I, P>>,
    queue: Mutex<Queue<I, P>>,
    changes: broadcast::Sender<StoreChanged>,
}

/// Per-id outcome while a flush stages its mutations.
struct Staged<P> {
    payload: Option<P>,
    /// Added in this flush rather than carried over.
    fresh: bool,
}

/// A batched store of records kept in ascending id order.
///
/// `add`, `update` and `delete` only enqueue. [`flush`](Self::flush) applies
/// the queue atomically; with a [`FlushTrigger::Debounce`] trigger a timer on
/// the ambient tokio runtime does so automatically.
pub struct OrderedBatchStore<I, P> {
    inner: Arc<Inner<I, P>>,
}

impl<I, P> Clone for OrderedBatchStore<I, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, P> OrderedBatchStore<I, P>
where
    I: Ord + Clone + Debug + Send + Sync + 'static,
    P: Merge + Clone + Send + Sync + 'static,
{
    /// Create an empty store.
    pub fn new(name: impl Into<String>, config: &BatchConfig, clock: SharedClock) -> BatchResult<Self> {
        config.validate()?;
        let (changes, _) = broadcast::channel(config.channel_capacity);
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.into(),
                trigger: config.trigger(),
                debounce_ms: config.debounce_ms,
                clock,
                records: RwLock::new(Records {
                    by_id: BTreeMap::new(),
                    flushes: 0,
                }),
                queue: Mutex::new(Queue {
                    mutations: Vec::new(),
                    armed: None,
                    next_epoch: 0,
                    due_at: None,
                }),
                changes,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn trigger(&self) -> FlushTrigger {
        self.inner.trigger
    }

    /// Queue a new record. Adding an id that already exists replaces its
    /// payload at flush time.
    pub fn add(&self, id: I, payload: P) {
        self.enqueue(Mutation::Add { id, payload });
    }

    /// Queue a partial update. Ignored at flush time if the id does not
    /// exist by then.
    pub fn update(&self, id: I, patch: P) {
        self.enqueue(Mutation::Update { id, patch });
    }

    /// Queue a deletion. Ignored at flush time if the id does not exist.
    pub fn delete(&self, id: I) {
        self.enqueue(Mutation::Delete { id });
    }

    /// Apply every queued mutation in arrival order.
    ///
    /// Mutations on the same id coalesce: updates merge into the payload,
    /// a delete discards everything before it, and an add after a delete
    /// starts a new record at version 1. The queue is empty afterwards.
    pub fn flush(&self) -> FlushReport {
        let mut records = self.inner.records.write().expect("records lock poisoned");
        let mutations = {
            let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
            queue.armed = None;
            queue.due_at = None;
            std::mem::take(&mut queue.mutations)
        };
        if mutations.is_empty() {
            return FlushReport::default();
        }

        let mut report = FlushReport {
            mutations: mutations.len(),
            ..FlushReport::default()
        };
        let staged = stage(&records.by_id, mutations);

        for (id, outcome) in staged {
            match outcome.payload {
                None => {
                    if records.by_id.remove(&id).is_some() {
                        report.deleted += 1;
                    }
                }
                Some(payload) if outcome.fresh => {
                    records.by_id.insert(id.clone(), StateRecord::new(id, payload));
                    report.added += 1;
                }
                Some(payload) => {
                    if let Some(record) = records.by_id.get_mut(&id) {
                        record.payload = payload;
                        record.version += 1;
                        report.updated += 1;
                    }
                }
            }
        }

        records.flushes += 1;
        let flush = records.flushes;
        drop(records);

        debug!(
            store = %self.inner.name,
            flush,
            mutations = report.mutations,
            added = report.added,
            updated = report.updated,
            deleted = report.deleted,
            "batch flushed"
        );
        // No receivers is fine.
        let _ = self.inner.changes.send(StoreChanged {
            store: self.inner.name.clone(),
            flush,
            report: report.clone(),
        });
        report
    }

    /// Flush if the debounce window of the oldest queued mutation has
    /// passed. For hosts that drive the store without a tokio runtime.
    pub fn flush_if_due(&self) -> Option<FlushReport> {
        let due_at = self.inner.queue.lock().expect("queue lock poisoned").due_at?;
        if self.inner.clock.now_ms() < due_at {
            return None;
        }
        Some(self.flush())
    }

    /// All records in ascending id order.
    pub fn list(&self) -> Vec<StateRecord<I, P>> {
        self.inner
            .records
            .read()
            .expect("records lock poisoned")
            .by_id
            .values()
            .cloned()
            .collect()
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> Vec<I> {
        self.inner
            .records
            .read()
            .expect("records lock poisoned")
            .by_id
            .keys()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &I) -> Option<StateRecord<I, P>> {
        self.inner
            .records
            .read()
            .expect("records lock poisoned")
            .by_id
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &I) -> bool {
        self.inner
            .records
            .read()
            .expect("records lock poisoned")
            .by_id
            .contains_key(id)
    }

    /// Number of flushed records.
    pub fn len(&self) -> usize {
        self.inner.records.read().expect("records lock poisoned").by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queued, unflushed mutations.
    pub fn pending_len(&self) -> usize {
        self.inner.queue.lock().expect("queue lock poisoned").mutations.len()
    }

    /// Receive a [`StoreChanged`] after every non-empty flush.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChanged> {
        self.inner.changes.subscribe()
    }

    fn enqueue(&self, mutation: Mutation<I, P>) {
        let arm = {
            let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
            let was_empty = queue.mutations.is_empty();
            queue.mutations.push(mutation);
            if !was_empty {
                None
            } else {
                queue.due_at = Some(self.inner.clock.now_ms().saturating_add(self.inner.debounce_ms));
                match self.inner.trigger {
                    FlushTrigger::Debounce(delay) => {
                        queue.next_epoch += 1;
                        let epoch = queue.next_epoch;
                        queue.armed = Some(epoch);
                        Some((epoch, delay))
                    }
                    FlushTrigger::Manual => None,
                }
            }
        };

        if let Some((epoch, delay)) = arm {
            self.arm_timer(epoch, delay);
        }
    }

    fn arm_timer(&self, epoch: u64, delay: std::time::Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(store = %self.inner.name, "no tokio runtime; waiting for flush_if_due");
            return;
        };
        let weak: Weak<Inner<I, P>> = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let store = OrderedBatchStore { inner };
            let current = store.inner.queue.lock().expect("queue lock poisoned").armed;
            if current == Some(epoch) {
                store.flush();
            }
        });
    }
}

/// Fold `mutations` over the current records into one outcome per id.
fn stage<I, P>(
    records: &BTreeMap<I, StateRecord<I, P>>,
    mutations: Vec<Mutation<I, P>>,
) -> BTreeMap<I, Staged<P>>
where
    I: Ord + Clone,
    P: Merge + Clone,
{
    let mut staged: BTreeMap<I, Staged<P>> = BTreeMap::new();

    for mutation in mutations {
        match mutation {
            Mutation::Add { id, payload } => {
                let live = match staged.get(&id) {
                    Some(s) => s.payload.is_some(),
                    None => records.contains_key(&id),
                };
                let entry = staged.entry(id).or_insert(Staged {
                    payload: None,
                    fresh: false,
                });
                if !live {
                    entry.fresh = true;
                }
                entry.payload = Some(payload);
            }
            Mutation::Update { id, patch } => {
                if let Some(s) = staged.get_mut(&id) {
                    if let Some(payload) = s.payload.as_mut() {
                        payload.merge(patch);
                    }
                } else if let Some(record) = records.get(&id) {
                    let mut payload = record.payload.clone();
                    payload.merge(patch);
                    staged.insert(
                        id,
                        Staged {
                            payload: Some(payload),
                            fresh: false,
                        },
                    );
                }
            }
            Mutation::Delete { id } => {
                if let Some(s) = staged.get_mut(&id) {
                    s.payload = None;
                    s.fresh = false;
                } else if records.contains_key(&id) {
                    staged.insert(
                        id,
                        Staged {
                            payload: None,
                            fresh: false,
                        },
                    );
                }
            }
        }
    }

    staged
}

impl<I, P> std::fmt::Debug for OrderedBatchStore<I, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedBatchStore")
            .field("name", &self.inner.name)
            .field("trigger", &self.inner.trigger)
            .finish_non_exhaustive()
    }
}

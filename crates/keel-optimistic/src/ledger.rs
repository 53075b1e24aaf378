use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::{debug, warn};

use keel_batch::{Merge, OrderedBatchStore};
use keel_types::SharedClock;

use crate::entry::{OptimisticEntry, OptimisticStatus, TempId, ViewItem};
use crate::error::{OptimisticError, OptimisticResult};

/// Scope used by [`OptimisticLedger::begin`].
pub const DEFAULT_SCOPE: &str = "default";

/// Side table of optimistic entries in front of an [`OrderedBatchStore`].
pub struct OptimisticLedger<I, P> {
    store: OrderedBatchStore<I, P>,
    clock: SharedClock,
    next_id: AtomicU64,
    entries: RwLock<BTreeMap<TempId, OptimisticEntry<P>>>,
}

impl<I, P> OptimisticLedger<I, P>
where
    I: Ord + Clone + Debug + Send + Sync + 'static,
    P: Merge + Clone + Send + Sync + 'static,
{
    pub fn new(store: OrderedBatchStore<I, P>, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            next_id: AtomicU64::new(1),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// The canonical store confirmed records are written to.
    pub fn store(&self) -> &OrderedBatchStore<I, P> {
        &self.store
    }

    /// Record a pending entry in the default scope.
    pub fn begin(&self, payload: P) -> TempId {
        self.begin_in(DEFAULT_SCOPE, payload)
    }

    /// Record a pending entry under `scope` and return its fresh temp id.
    pub fn begin_in(&self, scope: &str, payload: P) -> TempId {
        let temp_id = TempId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = OptimisticEntry {
            temp_id,
            scope: scope.to_string(),
            payload,
            status: OptimisticStatus::Pending,
            created_at: self.clock.now_ms(),
        };
        self.entries
            .write()
            .expect("ledger lock poisoned")
            .insert(temp_id, entry);
        debug!(temp_id = %temp_id, scope, "optimistic entry created");
        temp_id
    }

    /// Replace a pending entry with the backend's canonical record.
    ///
    /// The entry leaves the side table and the record is queued as an add on
    /// the store, so it appears in [`view`](Self::view) after the next flush.
    /// Returns the entry as confirmed. A failed entry is left untouched and
    /// `Ok(None)` is returned.
    pub fn confirm(&self, temp_id: TempId, id: I, payload: P) -> OptimisticResult<Option<OptimisticEntry<P>>> {
        let mut entries = self.entries.write().expect("ledger lock poisoned");
        if entries.get(&temp_id).is_some_and(|entry| entry.is_failed()) {
            debug!(temp_id = %temp_id, "confirm ignored for failed entry");
            return Ok(None);
        }
        let Some(mut entry) = entries.remove(&temp_id) else {
            return Err(self.unknown(temp_id, "confirm"));
        };
        drop(entries);

        entry.status = OptimisticStatus::Confirmed;
        debug!(temp_id = %temp_id, id = ?id, "optimistic entry confirmed");
        self.store.add(id, payload);
        Ok(Some(entry))
    }

    /// Mark a pending entry failed. It stays in the side table until cleared
    /// or reset. Returns `false` if it had already failed.
    pub fn fail(&self, temp_id: TempId) -> OptimisticResult<bool> {
        let mut entries = self.entries.write().expect("ledger lock poisoned");
        match entries.get_mut(&temp_id) {
            None => Err(self.unknown(temp_id, "fail")),
            Some(entry) if entry.is_failed() => Ok(false),
            Some(entry) => {
                entry.status = OptimisticStatus::Failed;
                debug!(temp_id = %temp_id, scope = %entry.scope, "optimistic entry failed");
                Ok(true)
            }
        }
    }

    /// Drop one entry regardless of status.
    pub fn clear(&self, temp_id: TempId) -> Option<OptimisticEntry<P>> {
        self.entries
            .write()
            .expect("ledger lock poisoned")
            .remove(&temp_id)
    }

    /// Drop every entry in `scope`. Returns how many were removed.
    pub fn reset(&self, scope: &str) -> usize {
        let mut entries = self.entries.write().expect("ledger lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.scope != scope);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(scope, removed, "optimistic scope reset");
        }
        removed
    }

    pub fn get(&self, temp_id: TempId) -> Option<OptimisticEntry<P>> {
        self.entries
            .read()
            .expect("ledger lock poisoned")
            .get(&temp_id)
            .cloned()
    }

    /// Pending entries, oldest first.
    pub fn pending(&self) -> Vec<OptimisticEntry<P>> {
        self.collect(OptimisticStatus::Pending)
    }

    /// Failed entries, oldest first.
    pub fn failed(&self) -> Vec<OptimisticEntry<P>> {
        self.collect(OptimisticStatus::Failed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("ledger lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical records in ascending id order, followed by every entry
    /// still in the side table in ascending temp id order.
    pub fn view(&self) -> Vec<ViewItem<I, P>> {
        let mut items: Vec<ViewItem<I, P>> = self
            .store
            .list()
            .into_iter()
            .map(ViewItem::Canonical)
            .collect();
        let entries = self.entries.read().expect("ledger lock poisoned");
        items.extend(entries.values().cloned().map(ViewItem::Optimistic));
        items
    }

    fn collect(&self, status: OptimisticStatus) -> Vec<OptimisticEntry<P>> {
        self.entries
            .read()
            .expect("ledger lock poisoned")
            .values()
            .filter(|entry| entry.status == status)
            .cloned()
            .collect()
    }

    fn unknown(&self, temp_id: TempId, op: &str) -> OptimisticError {
        warn!(temp_id = %temp_id, op, "unknown temporary id");
        OptimisticError::UnknownTempId(temp_id)
    }
}

impl<I, P> std::fmt::Debug for OptimisticLedger<I, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticLedger")
            .field("store", &self.store)
            .field(
                "entries",
                &self.entries.read().map(|e| e.len()).unwrap_or_default(),
            )
            .finish()
    }
}

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use keel_types::SharedClock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LivenessError, LivenessResult};

/// Registrations between opportunistic prunes.
const PRUNE_EVERY: usize = 64;

/// Identity of a registered handle: the address of its shared allocation.
///
/// Addresses are only unique among live allocations; the registry resolves
/// reuse by replacing slots whose previous occupant has died.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(usize);

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleId({:#x})", self.0)
    }
}

/// Caller-supplied description of a handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleMetadata {
    /// Category used to group handles in audit reports (e.g. "subscription").
    pub kind: String,
    /// Optional free-form label.
    pub label: Option<String>,
}

impl HandleMetadata {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Diagnostic view of one registered handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleInfo {
    pub id: HandleId,
    pub kind: String,
    pub label: Option<String>,
    pub registered_at: u64,
    pub last_accessed: u64,
}

/// Result of an [`audit`](LivenessRegistry::audit).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessReport {
    /// Handles still reachable.
    pub live: usize,
    /// Dead entries removed during this audit.
    pub pruned: usize,
    /// Live handle count per kind.
    pub by_kind: BTreeMap<String, usize>,
    /// The longest-registered live handle, the usual leak suspect.
    pub oldest: Option<HandleInfo>,
}

struct Slot {
    handle: Weak<dyn Any + Send + Sync>,
    info: HandleInfo,
}

impl Slot {
    fn is_live(&self) -> bool {
        self.handle.strong_count() > 0
    }
}

struct RegistryState {
    slots: HashMap<HandleId, Slot>,
    since_prune: usize,
}

impl RegistryState {
    fn prune(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live());
        self.since_prune = 0;
        before - self.slots.len()
    }
}

/// Weak side table of live shared objects.
pub struct LivenessRegistry {
    clock: SharedClock,
    state: RwLock<RegistryState>,
}

impl LivenessRegistry {
    /// Create an empty registry.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            state: RwLock::new(RegistryState {
                slots: HashMap::new(),
                since_prune: 0,
            }),
        }
    }

    /// Track a shared object. Re-registering the same object refreshes its
    /// metadata and access time.
    pub fn register<T>(&self, handle: &Arc<T>, metadata: HandleMetadata) -> HandleId
    where
        T: Send + Sync + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(handle);
        let weak: Weak<dyn Any + Send + Sync> = weak;
        self.insert(id_of(handle), weak, metadata)
    }

    /// Track an object through a weak reference.
    ///
    /// A weak reference that no longer reaches a live allocation has no
    /// identity to track. The call is rejected with
    /// [`LivenessError::InvalidHandle`], logged, and leaves the registry
    /// unchanged.
    pub fn register_weak<T>(&self, handle: &Weak<T>, metadata: HandleMetadata) -> LivenessResult<HandleId>
    where
        T: Send + Sync + 'static,
    {
        if handle.strong_count() == 0 {
            warn!(kind = %metadata.kind, "rejected registration of a dead or dangling handle");
            return Err(LivenessError::InvalidHandle(format!(
                "{} handle is not reachable",
                metadata.kind
            )));
        }
        let id = HandleId(Weak::as_ptr(handle) as *const () as usize);
        let weak: Weak<dyn Any + Send + Sync> = handle.clone();
        Ok(self.insert(id, weak, metadata))
    }

    /// Stop tracking `handle`. Returns `true` if it was registered.
    pub fn unregister<T>(&self, handle: &Arc<T>) -> bool
    where
        T: Send + Sync + 'static,
    {
        let id = id_of(handle);
        let mut state = self.state.write().expect("liveness lock poisoned");
        let removed = state.slots.remove(&id).is_some();
        if removed {
            debug!(handle = ?id, "handle unregistered");
        }
        removed
    }

    /// Refresh the last-access time of a registered handle.
    pub fn touch<T>(&self, handle: &Arc<T>) -> bool
    where
        T: Send + Sync + 'static,
    {
        let now = self.clock.now_ms();
        let mut state = self.state.write().expect("liveness lock poisoned");
        match state.slots.get_mut(&id_of(handle)) {
            Some(slot) if slot.is_live() => {
                slot.info.last_accessed = now;
                true
            }
            _ => false,
        }
    }

    /// Diagnostic lookup of a handle's registration.
    pub fn info<T>(&self, handle: &Arc<T>) -> Option<HandleInfo>
    where
        T: Send + Sync + 'static,
    {
        let state = self.state.read().expect("liveness lock poisoned");
        state
            .slots
            .get(&id_of(handle))
            .filter(|slot| slot.is_live())
            .map(|slot| slot.info.clone())
    }

    /// Drop entries whose object has been freed. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let pruned = self.state.write().expect("liveness lock poisoned").prune();
        if pruned > 0 {
            debug!(pruned, "pruned dead handles");
        }
        pruned
    }

    /// Prune, then report on everything still alive.
    pub fn audit(&self) -> LivenessReport {
        let mut state = self.state.write().expect("liveness lock poisoned");
        let pruned = state.prune();

        let mut report = LivenessReport {
            pruned,
            ..Default::default()
        };
        for slot in state.slots.values() {
            report.live += 1;
            *report.by_kind.entry(slot.info.kind.clone()).or_default() += 1;
            let older = report
                .oldest
                .as_ref()
                .map_or(true, |o| (slot.info.registered_at, slot.info.id) < (o.registered_at, o.id));
            if older {
                report.oldest = Some(slot.info.clone());
            }
        }
        report
    }

    /// Number of live handles. Dead entries not yet pruned are not counted.
    pub fn live_count(&self) -> usize {
        let state = self.state.read().expect("liveness lock poisoned");
        state.slots.values().filter(|slot| slot.is_live()).count()
    }

    fn insert(&self, id: HandleId, handle: Weak<dyn Any + Send + Sync>, metadata: HandleMetadata) -> HandleId {
        let now = self.clock.now_ms();
        let mut state = self.state.write().expect("liveness lock poisoned");

        let registered_at = match state.slots.get(&id) {
            // Same object registered again: keep its original registration time.
            Some(slot) if slot.is_live() => slot.info.registered_at,
            _ => now,
        };
        state.slots.insert(
            id,
            Slot {
                handle,
                info: HandleInfo {
                    id,
                    kind: metadata.kind,
                    label: metadata.label,
                    registered_at,
                    last_accessed: now,
                },
            },
        );

        state.since_prune += 1;
        if state.since_prune >= PRUNE_EVERY {
            let pruned = state.prune();
            if pruned > 0 {
                debug!(pruned, "opportunistic prune of dead handles");
            }
        }
        id
    }
}

impl fmt::Debug for LivenessRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessRegistry")
            .field("live", &self.live_count())
            .finish()
    }
}

fn id_of<T>(handle: &Arc<T>) -> HandleId {
    HandleId(Arc::as_ptr(handle) as *const () as usize)
}

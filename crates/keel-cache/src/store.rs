use std::any::Any;
use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use keel_types::SharedClock;
use tracing::{debug, info};

use crate::config::CacheDefaults;
use crate::error::{CacheError, CacheResult};
use crate::namespace::{CacheMaintenance, Namespace, NamespaceInner};
use crate::stats::NamespaceStats;

/// A registered namespace, kept both as a maintenance trait object and as a
/// type-erased handle that can be downcast back to its concrete key/value
/// types.
struct Registered {
    maintenance: Arc<dyn CacheMaintenance>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Registry of cache namespaces.
///
/// The store itself holds no entries; it creates namespaces, hands out typed
/// handles, and fans maintenance (expiry sweeps, forced eviction, clearing)
/// out across every namespace it knows about.
pub struct CacheStore {
    clock: SharedClock,
    defaults: CacheDefaults,
    namespaces: RwLock<BTreeMap<String, Registered>>,
}

impl CacheStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: SharedClock) -> Self {
        Self::with_defaults(clock, CacheDefaults::default())
    }

    /// Create an empty store with explicit namespace defaults.
    pub fn with_defaults(clock: SharedClock, defaults: CacheDefaults) -> Self {
        Self {
            clock,
            defaults,
            namespaces: RwLock::new(BTreeMap::new()),
        }
    }

    /// The defaults used by [`create_default_namespace`](Self::create_default_namespace).
    pub fn defaults(&self) -> &CacheDefaults {
        &self.defaults
    }

    /// Create a namespace with the given capacity and default TTL.
    ///
    /// Fails with [`CacheError::InvalidConfig`] when `max_size` or `ttl` is
    /// zero, and with [`CacheError::NamespaceExists`] when the name is taken.
    pub fn create_namespace<K, V>(
        &self,
        name: &str,
        max_size: usize,
        ttl: Duration,
    ) -> CacheResult<Namespace<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        if max_size == 0 {
            return Err(CacheError::InvalidConfig(format!(
                "namespace {name}: max_size must be positive"
            )));
        }
        if ttl.is_zero() {
            return Err(CacheError::InvalidConfig(format!(
                "namespace {name}: ttl must be positive"
            )));
        }

        let mut map = self.namespaces.write().expect("cache registry lock poisoned");
        if map.contains_key(name) {
            return Err(CacheError::NamespaceExists(name.to_string()));
        }

        let namespace = Namespace::<K, V>::new(name, max_size, ttl, Arc::clone(&self.clock));
        let inner: Arc<NamespaceInner<K, V>> = Arc::clone(namespace.inner());
        let maintenance: Arc<dyn CacheMaintenance> = inner.clone();
        let typed: Arc<dyn Any + Send + Sync> = inner;
        map.insert(name.to_string(), Registered { maintenance, typed });

        info!(namespace = name, max_size, ttl_ms = ttl.as_millis() as u64, "cache namespace created");
        Ok(namespace)
    }

    /// Create a namespace using the store's [`CacheDefaults`].
    pub fn create_default_namespace<K, V>(&self, name: &str) -> CacheResult<Namespace<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let ttl = self.defaults.ttl();
        self.create_namespace(name, self.defaults.max_size, ttl)
    }

    /// Look up an existing namespace by name.
    pub fn namespace<K, V>(&self, name: &str) -> CacheResult<Namespace<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let map = self.namespaces.read().expect("cache registry lock poisoned");
        let registered = map
            .get(name)
            .ok_or_else(|| CacheError::NamespaceNotFound(name.to_string()))?;
        let inner = Arc::clone(&registered.typed)
            .downcast::<NamespaceInner<K, V>>()
            .map_err(|_| CacheError::TypeMismatch(name.to_string()))?;
        Ok(Namespace::from_inner(inner))
    }

    /// Drop a namespace from the registry. Handles already given out keep
    /// working but are no longer reached by store-wide maintenance.
    pub fn remove_namespace(&self, name: &str) -> bool {
        let removed = self
            .namespaces
            .write()
            .expect("cache registry lock poisoned")
            .remove(name)
            .is_some();
        if removed {
            debug!(namespace = name, "cache namespace removed");
        }
        removed
    }

    /// Names of all registered namespaces, sorted.
    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces
            .read()
            .expect("cache registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Sweep expired entries from one namespace.
    pub fn evict_expired(&self, name: &str) -> CacheResult<usize> {
        Ok(self.maintenance(name)?.evict_expired())
    }

    /// Sweep expired entries from every namespace. Returns the total removed.
    pub fn evict_expired_all(&self) -> usize {
        self.all_maintenance()
            .iter()
            .map(|ns| ns.evict_expired())
            .sum()
    }

    /// Force LRU eviction of `fraction` of the entries in every namespace.
    pub fn evict_lru_fraction_all(&self, fraction: f64) -> usize {
        self.all_maintenance()
            .iter()
            .map(|ns| ns.evict_lru_fraction(fraction))
            .sum()
    }

    /// Clear one namespace.
    pub fn clear(&self, name: &str) -> CacheResult<()> {
        self.maintenance(name)?.clear();
        Ok(())
    }

    /// Clear every namespace.
    pub fn clear_all(&self) {
        for ns in self.all_maintenance() {
            ns.clear();
        }
    }

    /// Entries across all namespaces.
    pub fn total_entries(&self) -> usize {
        self.all_maintenance().iter().map(|ns| ns.len()).sum()
    }

    /// Per-namespace stats, sorted by name.
    pub fn stats(&self) -> Vec<NamespaceStats> {
        self.all_maintenance().iter().map(|ns| ns.stats()).collect()
    }

    fn maintenance(&self, name: &str) -> CacheResult<Arc<dyn CacheMaintenance>> {
        self.namespaces
            .read()
            .expect("cache registry lock poisoned")
            .get(name)
            .map(|r| Arc::clone(&r.maintenance))
            .ok_or_else(|| CacheError::NamespaceNotFound(name.to_string()))
    }

    /// Snapshot the registry so maintenance runs without holding its lock.
    fn all_maintenance(&self) -> Vec<Arc<dyn CacheMaintenance>> {
        self.namespaces
            .read()
            .expect("cache registry lock poisoned")
            .values()
            .map(|r| Arc::clone(&r.maintenance))
            .collect()
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("namespaces", &self.namespace_names())
            .field("defaults", &self.defaults)
            .finish()
    }
}

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keel_types::SharedClock;
use tracing::debug;

use crate::entry::{CacheEntry, EntryInfo};
use crate::stats::{CacheStats, NamespaceStats};

/// Maintenance operations every namespace supports regardless of its key and
/// value types.
///
/// The [`CacheStore`](crate::CacheStore) keeps namespaces as trait objects of
/// this type so that sweeps and forced eviction can run across all of them.
pub trait CacheMaintenance: Send + Sync {
    /// Namespace name.
    fn name(&self) -> &str;

    /// Remove every entry whose TTL has elapsed. Returns how many were removed.
    fn evict_expired(&self) -> usize;

    /// Remove `ceil(len * fraction)` least-recently-used entries.
    fn evict_lru_fraction(&self, fraction: f64) -> usize;

    /// Remove every entry.
    fn clear(&self);

    /// Number of stored entries (expired ones included until swept).
    fn len(&self) -> usize;

    /// Snapshot of the namespace counters.
    fn stats(&self) -> NamespaceStats;
}

/// Mutable part of a namespace, guarded by one mutex.
struct NamespaceState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// access_seq -> key, oldest first.
    access_order: BTreeMap<u64, K>,
    next_seq: u64,
    stats: CacheStats,
}

impl<K, V> NamespaceState<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            access_order: BTreeMap::new(),
            next_seq: 0,
            stats: CacheStats::default(),
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn remove_entry(&mut self, key: &K) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.access_order.remove(&entry.access_seq);
        self.stats.entries = self.entries.len();
        Some(entry)
    }

    /// Pop the least-recently-accessed entry.
    fn evict_oldest(&mut self) -> Option<K> {
        let (_, key) = self.access_order.pop_first()?;
        self.entries.remove(&key);
        self.stats.evictions += 1;
        self.stats.entries = self.entries.len();
        Some(key)
    }

    fn touch(&mut self, key: &K, now: u64) {
        let seq = self.bump_seq();
        if let Some(entry) = self.entries.get_mut(key) {
            self.access_order.remove(&entry.access_seq);
            entry.access_seq = seq;
            entry.last_accessed = now;
            self.access_order.insert(seq, key.clone());
        }
    }
}

pub(crate) struct NamespaceInner<K, V> {
    name: String,
    max_size: usize,
    default_ttl: Duration,
    clock: SharedClock,
    state: Mutex<NamespaceState<K, V>>,
}

/// Typed handle to one cache namespace.
///
/// Cloning the handle is cheap and every clone addresses the same entries.
pub struct Namespace<K, V> {
    inner: Arc<NamespaceInner<K, V>>,
}

impl<K, V> Clone for Namespace<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Namespace<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(name: &str, max_size: usize, default_ttl: Duration, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(NamespaceInner {
                name: name.to_string(),
                max_size,
                default_ttl,
                clock,
                state: Mutex::new(NamespaceState::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<NamespaceInner<K, V>>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<NamespaceInner<K, V>> {
        &self.inner
    }

    /// Namespace name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Maximum number of entries.
    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// TTL applied by [`set`](Self::set).
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Insert or overwrite `key` with the namespace's default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.inner.default_ttl);
    }

    /// Insert or overwrite `key` with an explicit TTL.
    ///
    /// When the namespace is full and `key` is new, the least-recently
    /// accessed entry is evicted first.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = self.inner.clock.now_ms();
        let mut state = self.inner.state.lock().expect("cache lock poisoned");

        if state.remove_entry(&key).is_none() {
            while state.entries.len() >= self.inner.max_size {
                if state.evict_oldest().is_none() {
                    break;
                }
                debug!(namespace = %self.inner.name, max_size = self.inner.max_size, "capacity reached, evicted LRU entry");
            }
        }

        let seq = state.bump_seq();
        let entry = CacheEntry::new(value, now, ttl.as_millis() as u64, seq);
        state.entries.insert(key.clone(), entry);
        state.access_order.insert(seq, key);
        state.stats.inserts += 1;
        state.stats.entries = state.entries.len();
    }

    /// Look up `key`, returning a clone of the value.
    ///
    /// An entry older than its TTL is removed on the spot and reported as a
    /// miss. A hit refreshes the entry's last-access time.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.inner.clock.now_ms();
        let mut state = self.inner.state.lock().expect("cache lock poisoned");

        let expired = match state.entries.get(key) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.remove_entry(key);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            return None;
        }

        state.touch(key, now);
        state.stats.hits += 1;
        state.entries.get(key).map(|e| e.value.clone())
    }

    /// `true` if `key` is present and not expired. Does not count as an access.
    pub fn contains(&self, key: &K) -> bool {
        let now = self.inner.clock.now_ms();
        let state = self.inner.state.lock().expect("cache lock poisoned");
        state.entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Metadata for `key` without touching it.
    pub fn entry_info(&self, key: &K) -> Option<EntryInfo> {
        let state = self.inner.state.lock().expect("cache lock poisoned");
        state.entries.get(key).map(CacheEntry::info)
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut state = self.inner.state.lock().expect("cache lock poisoned");
        state.remove_entry(key).map(|e| e.value)
    }

    /// Keys from least to most recently accessed.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let state = self.inner.state.lock().expect("cache lock poisoned");
        state.access_order.values().cloned().collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.state.lock().expect("cache lock poisoned").entries.len()
    }

    /// `true` if the namespace holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all TTL-expired entries. Idempotent.
    pub fn evict_expired(&self) -> usize {
        self.inner.evict_expired()
    }

    /// Remove `count` least-recently-used entries (or all, if fewer).
    pub fn evict_lru(&self, count: usize) -> usize {
        self.inner.evict_lru(count)
    }

    /// Remove `ceil(len * fraction)` least-recently-used entries.
    pub fn evict_lru_fraction(&self, fraction: f64) -> usize {
        self.inner.evict_lru_fraction(fraction)
    }

    /// Remove all entries and reset the access order.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        self.inner.state.lock().expect("cache lock poisoned").stats.clone()
    }
}

impl<K, V> NamespaceInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn evict_lru(&self, count: usize) -> usize {
        let mut state = self.state.lock().expect("cache lock poisoned");
        let mut removed = 0;
        while removed < count && state.evict_oldest().is_some() {
            removed += 1;
        }
        removed
    }
}

impl<K, V> CacheMaintenance for NamespaceInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evict_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().expect("cache lock poisoned");
        let expired: Vec<K> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            state.remove_entry(key);
        }
        state.stats.expirations += expired.len() as u64;

        if !expired.is_empty() {
            debug!(namespace = %self.name, removed = expired.len(), "evicted expired entries");
        }
        expired.len()
    }

    fn evict_lru_fraction(&self, fraction: f64) -> usize {
        if fraction.is_nan() || fraction <= 0.0 {
            return 0;
        }
        let fraction = fraction.min(1.0);
        let len = self.len();
        let count = (len as f64 * fraction).ceil() as usize;
        let removed = self.evict_lru(count);
        if removed > 0 {
            debug!(namespace = %self.name, removed, fraction, "forced LRU eviction");
        }
        removed
    }

    fn clear(&self) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.entries.clear();
        state.access_order.clear();
        state.stats.entries = 0;
    }

    fn len(&self) -> usize {
        self.state.lock().expect("cache lock poisoned").entries.len()
    }

    fn stats(&self) -> NamespaceStats {
        NamespaceStats {
            name: self.name.clone(),
            max_size: self.max_size,
            stats: self.state.lock().expect("cache lock poisoned").stats.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for Namespace<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.inner.name)
            .field("max_size", &self.inner.max_size)
            .field("default_ttl", &self.inner.default_ttl)
            .finish()
    }
}

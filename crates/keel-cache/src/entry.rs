use serde::{Deserialize, Serialize};

/// A cached value plus its bookkeeping.
///
/// Owned exclusively by the namespace that created it.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,
    /// Clock reading (ms) when the value was written.
    pub created_at: u64,
    /// Time-to-live in milliseconds.
    pub ttl_ms: u64,
    /// Clock reading (ms) of the last read or write.
    pub last_accessed: u64,
    /// Monotonic access sequence. Breaks ties between accesses that share a
    /// millisecond, so LRU order is total.
    pub(crate) access_seq: u64,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, now: u64, ttl_ms: u64, access_seq: u64) -> Self {
        Self {
            value,
            created_at: now,
            ttl_ms,
            last_accessed: now,
            access_seq,
        }
    }

    /// `true` once the entry has lived strictly longer than its TTL.
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) > self.ttl_ms
    }

    /// Age in milliseconds at `now`.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    /// Metadata view without the value.
    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            created_at: self.created_at,
            ttl_ms: self.ttl_ms,
            last_accessed: self.last_accessed,
        }
    }
}

/// Entry metadata exposed to callers (the value is never handed out by
/// reference).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub created_at: u64,
    pub ttl_ms: u64,
    pub last_accessed: u64,
}

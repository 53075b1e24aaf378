//! Namespaced in-memory cache for Keel.
//!
//! A [`CacheStore`] owns any number of named namespaces. Each namespace is a
//! bounded key/value map with its own capacity and default time-to-live, and
//! is reached through a typed [`Namespace`] handle.
//!
//! # Eviction
//!
//! - **Capacity**: inserting a new key into a full namespace evicts the entry
//!   with the oldest last access first. There is exactly one policy: strict
//!   LRU by last access.
//! - **TTL**: an entry whose age exceeds its TTL is removed lazily on `get`
//!   and eagerly by [`Namespace::evict_expired`].
//! - **Forced**: [`Namespace::evict_lru_fraction`] drops a share of the least
//!   recently used entries regardless of TTL. The resource monitor uses this
//!   under memory pressure.
//!
//! # Design Rules
//!
//! 1. `len() <= max_size` holds after every mutation.
//! 2. Values are cloned in and out; no reference into a namespace escapes.
//! 3. An expired entry is a miss, never an error.
//! 4. Side effects of an operation stay inside the namespace it targets.

pub mod config;
pub mod entry;
pub mod error;
pub mod namespace;
pub mod stats;
pub mod store;

pub use config::CacheDefaults;
pub use entry::{CacheEntry, EntryInfo};
pub use error::{CacheError, CacheResult};
pub use namespace::{CacheMaintenance, Namespace};
pub use stats::{CacheStats, NamespaceStats};
pub use store::CacheStore;

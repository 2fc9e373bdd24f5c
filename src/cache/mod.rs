//! Cache Module
//!
//! Bounded in-memory caching with TTL expiry, capacity eviction and operation locks, plus a
//! write-through variant persisted to a key/value [`Storage`].

mod cleanup;
mod entry;
mod persistent;
mod stats;
mod storage;
mod store;


pub use entry::CacheEntry;
pub use persistent::{PersistentCache, PersistentCacheError};
pub use stats::CacheStats;
pub use storage::{MemoryStorage, Storage, StorageError};
pub use store::{
    BoundedCache, CacheConfig, CacheConfigError, KeyLock, DEFAULT_CLEANUP_INTERVAL,
    DEFAULT_MAX_SIZE, DEFAULT_TTL,
};

/// Lifecycle hooks a process-level owner uses on caches of any value type.
pub trait ManagedCache: Send + Sync {
    fn stats(&self) -> CacheStats;

    /// Flush anything durable, then destroy the cache.
    fn shutdown(&self);
}

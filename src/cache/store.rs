//! Cache Store Module
//!
//! TTL-based, size-capped key/value store with per-key operation locks.
//!
//! Capacity policy: after an insert pushes the cache over `max_size`, expired entries are swept
//! first; if that is not enough, entries are evicted down to 70% of `max_size`, least-accessed
//! first (least recently read breaks ties). Locked keys and the key just written are never
//! chosen, so a cache full of locked keys can stay above capacity until the locks are released.
//!
//! Failure policy: the store never errors. A rejected `set` returns `false`, a miss returns
//! `None`; both are safe to treat as "recompute".

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::cleanup::spawn_cleanup_task;
use crate::cache::stats::Counters;
use crate::cache::{CacheEntry, CacheStats, ManagedCache};
use crate::clock::{Clock, MonotonicClock};

/// Share of `max_size` the aggressive pass shrinks to, in percent.
const AGGRESSIVE_TARGET_PERCENT: usize = 70;

pub const DEFAULT_MAX_SIZE: usize = 1_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Errors from cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheConfigError {
    #[error("max_size must be > 0")]
    InvalidMaxSize,
    #[error("default_ttl must be > 0")]
    InvalidTtl,
    #[error("cleanup_interval must be > 0")]
    InvalidCleanupInterval,
}

// == Cache Config ==
/// Validated construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    max_size: usize,
    default_ttl: Duration,
    cleanup_interval: Duration,
}

impl CacheConfig {
    pub fn new(
        max_size: usize,
        default_ttl: Duration,
        cleanup_interval: Duration,
    ) -> Result<Self, CacheConfigError> {
        if max_size == 0 {
            return Err(CacheConfigError::InvalidMaxSize);
        }
        if default_ttl.is_zero() {
            return Err(CacheConfigError::InvalidTtl);
        }
        if cleanup_interval.is_zero() {
            return Err(CacheConfigError::InvalidCleanupInterval);
        }
        Ok(Self { max_size, default_ttl, cleanup_interval })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            default_ttl: DEFAULT_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    locks: HashSet<String>,
    counters: Counters,
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.counters.forget(entry.access_count);
        Some(entry)
    }

    fn remove_expired(&mut self, now: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                self.counters.record_expiration(entry.access_count);
            }
        }
        expired.len()
    }
}

// == Bounded Cache ==
/// Thread-safe bounded cache. Share it through `Arc` to run the background sweep.
#[derive(Debug)]
pub struct BoundedCache<V> {
    inner: Mutex<Inner<V>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    destroyed: AtomicBool,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl<V> BoundedCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::default()))
    }

    /// Cache reading time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                locks: HashSet::new(),
                counters: Counters::default(),
            }),
            config,
            clock,
            destroyed: AtomicBool::new(false),
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    // == Set ==
    /// Insert or overwrite `key`; `ttl` defaults to the configured TTL.
    ///
    /// Returns `false` without touching the cache when the key is locked or the cache has been
    /// destroyed.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> bool {
        let key = key.into();
        if self.is_destroyed() {
            debug!(key = %key, "set on destroyed cache ignored");
            return false;
        }
        let mut inner = self.lock();
        if inner.locks.contains(&key) {
            warn!(key = %key, "cache set rejected: key has an operation in progress");
            return false;
        }
        self.insert(&mut inner, key, value, ttl);
        true
    }

    /// `set` with an absolute expiry instead of a TTL.
    pub(crate) fn insert_expiring_at(&self, key: String, value: V, expires_at: u64) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let mut inner = self.lock();
        if inner.locks.contains(&key) {
            return false;
        }
        let now = self.now();
        self.store(&mut inner, key, CacheEntry::expiring_at(value, now, expires_at));
        true
    }

    fn insert(&self, inner: &mut Inner<V>, key: String, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry::new(value, self.now(), ttl.unwrap_or(self.config.default_ttl));
        self.store(inner, key, entry);
    }

    fn store(&self, inner: &mut Inner<V>, key: String, entry: CacheEntry<V>) {
        if let Some(previous) = inner.entries.insert(key.clone(), entry) {
            inner.counters.forget(previous.access_count);
        }
        if inner.entries.len() > self.config.max_size {
            self.enforce_capacity(inner, &key);
        }
    }

    fn enforce_capacity(&self, inner: &mut Inner<V>, protected: &str) {
        let expired = inner.remove_expired(self.now());
        if inner.entries.len() <= self.config.max_size {
            debug!(expired, "capacity restored by expiring entries");
            return;
        }

        let target = self.config.max_size * AGGRESSIVE_TARGET_PERCENT / 100;
        let mut candidates: Vec<(u64, u64, String)> = inner
            .entries
            .iter()
            .filter(|(k, _)| k.as_str() != protected && !inner.locks.contains(k.as_str()))
            .map(|(k, e)| (e.access_count, e.last_accessed_at, k.clone()))
            .collect();
        candidates.sort_unstable();

        let excess = inner.entries.len().saturating_sub(target);
        let mut evicted = 0;
        for (_, _, key) in candidates.into_iter().take(excess) {
            if let Some(entry) = inner.entries.remove(&key) {
                inner.counters.record_eviction(entry.access_count);
                evicted += 1;
            }
        }
        info!(
            expired,
            evicted,
            size = inner.entries.len(),
            max_size = self.config.max_size,
            "aggressive cache cleanup"
        );
    }

    // == Get ==
    /// Live value for `key`; an expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let now = self.now();
        let mut guard = self.lock();
        let inner = &mut *guard;
        let expired = match inner.entries.get_mut(key) {
            None => {
                inner.counters.record_miss();
                return None;
            }
            Some(entry) if entry.is_expired(now) => entry.access_count,
            Some(entry) => {
                entry.touch(now);
                inner.counters.record_hit();
                return Some(entry.value.clone());
            }
        };
        inner.entries.remove(key);
        inner.counters.record_expiration(expired);
        inner.counters.record_miss();
        None
    }

    /// Whether a live entry exists; does not count as an access.
    pub fn has(&self, key: &str) -> bool {
        let now = self.now();
        let mut guard = self.lock();
        let inner = &mut *guard;
        let expired = match inner.entries.get(key) {
            None => return false,
            Some(entry) if entry.is_expired(now) => entry.access_count,
            Some(_) => return true,
        };
        inner.entries.remove(key);
        inner.counters.record_expiration(expired);
        false
    }

    // == Delete ==
    /// Remove `key`, returning whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Remove every entry. Statistics counters are kept, and so are operation locks: they belong
    /// to live [`KeyLock`] guards and are released when those drop.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.counters.total_access = 0;
    }

    /// Number of stored entries, including expired ones not swept yet.
    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats::from_counters(inner.entries.len(), self.config.max_size, &inner.counters)
    }

    /// Sweep expired entries now, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.now();
        self.lock().remove_expired(now)
    }

    /// Live entries with their absolute expiry.
    pub(crate) fn live_entries(&self) -> Vec<(String, V, u64)>
    where
        V: Clone,
    {
        let now = self.now();
        self.lock()
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, e)| (k.clone(), e.value.clone(), e.expires_at))
            .collect()
    }

    // == Operation Locks ==
    /// Mark `key` as mid-operation. `None` if it is already locked or the cache is destroyed.
    ///
    /// While the guard lives, plain `set` calls for the key are rejected and eviction skips it.
    pub fn try_lock(&self, key: impl Into<String>) -> Option<KeyLock<'_, V>> {
        if self.is_destroyed() {
            return None;
        }
        let key = key.into();
        if !self.lock().locks.insert(key.clone()) {
            return None;
        }
        Some(KeyLock { cache: self, key })
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.lock().locks.contains(key)
    }

    fn unlock(&self, key: &str) {
        self.lock().locks.remove(key);
    }

    /// Cached value for `key`, or the result of `compute` stored under the key's lock.
    ///
    /// If another operation holds the lock the computed value is returned uncached. Errors from
    /// `compute` propagate and nothing is stored.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<V, E>
    where
        V: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let lock = self.try_lock(key);
        if lock.is_none() {
            debug!(key, "key busy; computing without caching");
        }
        let value = compute().await?;
        if let Some(lock) = lock {
            lock.commit(value.clone(), ttl);
        }
        Ok(value)
    }

    // == Lifecycle ==
    /// Start the periodic expired-entry sweep. Returns `false` if it is already running or the
    /// cache is destroyed. Must be called from within a tokio runtime.
    pub fn spawn_cleanup(self: &Arc<Self>) -> bool
    where
        V: Send + 'static,
    {
        if self.is_destroyed() {
            return false;
        }
        let mut task = self.cleanup_task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        *task = Some(spawn_cleanup_task(Arc::downgrade(self), self.config.cleanup_interval));
        true
    }

    /// Clear all entries and locks, stop the sweep, and reject further writes.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_cleanup();
        let mut inner = self.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.locks.clear();
        inner.counters.total_access = 0;
        info!(dropped, "cache destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn stop_cleanup(&self) {
        let handle = self.cleanup_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> Drop for BoundedCache<V> {
    fn drop(&mut self) {
        self.stop_cleanup();
    }
}

impl<V: Send> ManagedCache for BoundedCache<V> {
    fn stats(&self) -> CacheStats {
        BoundedCache::stats(self)
    }

    fn shutdown(&self) {
        self.destroy();
    }
}

// == Key Lock ==
/// RAII operation lock on one cache key; released on drop.
#[derive(Debug)]
pub struct KeyLock<'a, V> {
    cache: &'a BoundedCache<V>,
    key: String,
}

impl<V> KeyLock<'_, V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store `value` under the locked key, then release the lock.
    pub fn commit(self, value: V, ttl: Option<Duration>) -> bool {
        if self.cache.is_destroyed() {
            return false;
        }
        let mut inner = self.cache.lock();
        self.cache.insert(&mut inner, self.key.clone(), value, ttl);
        true
    }
}

impl<V> Drop for KeyLock<'_, V> {
    fn drop(&mut self) {
        self.cache.unlock(&self.key);
    }
}

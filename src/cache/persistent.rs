//! Write-through cache persisted to a [`Storage`] backend.
//!
//! Memory is the fast tier; every write is mirrored to storage as JSON under
//! `"{namespace}:{key}"` with an absolute expiry, so entries survive a process restart as long as
//! the clock is wall-clock based. Reads fall back to storage on a memory miss and rehydrate memory.
//!
//! The persisted tier holds at most `max_size` entries per namespace. When the backend reports
//! its quota is exhausted, the namespace's expired entries are purged and the write is retried
//! once.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{BoundedCache, CacheConfig, CacheStats, ManagedCache, Storage, StorageError};
use crate::clock::{duration_millis, Clock, SystemClock};

/// Errors from the persistent tier.
#[derive(Debug, thiserror::Error)]
pub enum PersistentCacheError {
    /// The backend is still out of space after purging expired entries.
    #[error("storage quota exceeded while writing '{key}'")]
    QuotaExceeded { key: String },
    /// The namespace already holds `max_size` live entries.
    #[error("persistent cache is full ({max_size} entries)")]
    Capacity { max_size: usize },
    /// The memory tier refused the key (locked or destroyed).
    #[error("cache rejected '{key}'")]
    Rejected { key: String },
    #[error("failed to encode entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Serialize, Deserialize)]
struct StoredEntry<T> {
    value: T,
    expires_at: u64,
}

#[derive(Deserialize)]
struct StoredExpiry {
    expires_at: u64,
}

/// Bounded cache mirrored to durable storage.
#[derive(Debug)]
pub struct PersistentCache<V> {
    memory: Arc<BoundedCache<V>>,
    storage: Arc<dyn Storage>,
    namespace: String,
}

impl<V> PersistentCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Cache using wall-clock time, so persisted expiries stay meaningful across restarts.
    pub fn new(namespace: impl Into<String>, config: CacheConfig, storage: Arc<dyn Storage>) -> Self {
        Self::with_clock(namespace, config, storage, Arc::new(SystemClock))
    }

    pub fn with_clock(
        namespace: impl Into<String>,
        config: CacheConfig,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            memory: Arc::new(BoundedCache::with_clock(config, clock)),
            storage,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The in-memory tier, e.g. to start its cleanup task.
    pub fn memory(&self) -> &Arc<BoundedCache<V>> {
        &self.memory
    }

    /// Store in memory and write through to storage.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), PersistentCacheError> {
        let ttl = ttl.unwrap_or(self.memory.config().default_ttl());
        let expires_at = self.memory.now().saturating_add(duration_millis(ttl));
        if !self.memory.insert_expiring_at(key.to_string(), value.clone(), expires_at) {
            return Err(PersistentCacheError::Rejected { key: key.to_string() });
        }
        self.persist(key, &value, expires_at)
    }

    /// Memory first, then storage. Storage failures are logged and read as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(value) = self.memory.get(key) {
            return Some(value);
        }
        let storage_key = self.storage_key(key);
        let raw = match self.storage.get_item(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!(namespace = %self.namespace, key, %error, "persistent read failed");
                return None;
            }
        };
        match serde_json::from_str::<StoredEntry<V>>(&raw) {
            Ok(stored) if stored.expires_at >= self.memory.now() => {
                self.memory.insert_expiring_at(key.to_string(), stored.value.clone(), stored.expires_at);
                Some(stored.value)
            }
            Ok(_) => {
                self.discard(&storage_key);
                None
            }
            Err(error) => {
                warn!(namespace = %self.namespace, key, %error, "discarding undecodable entry");
                self.discard(&storage_key);
                None
            }
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.memory.has(key) || self.get(key).is_some()
    }

    /// Remove from both tiers, returning whether either held the key.
    pub fn delete(&self, key: &str) -> bool {
        let in_memory = self.memory.delete(key);
        let storage_key = self.storage_key(key);
        let persisted = matches!(self.storage.get_item(&storage_key), Ok(Some(_)));
        if persisted {
            self.discard(&storage_key);
        }
        in_memory || persisted
    }

    /// Empty memory and every persisted entry of this namespace.
    pub fn clear(&self) -> Result<(), PersistentCacheError> {
        self.memory.clear();
        for key in self.namespaced_keys()? {
            self.storage.remove_item(&key)?;
        }
        Ok(())
    }

    /// Write every live memory entry to storage, returning how many were written.
    pub fn flush(&self) -> Result<usize, PersistentCacheError> {
        let entries = self.memory.live_entries();
        let written = entries.len();
        for (key, value, expires_at) in entries {
            self.persist(&key, &value, expires_at)?;
        }
        Ok(written)
    }

    /// Drop persisted entries of this namespace that are expired or unreadable.
    pub fn purge_expired(&self) -> Result<usize, PersistentCacheError> {
        let now = self.memory.now();
        let mut purged = 0;
        for key in self.namespaced_keys()? {
            let Some(raw) = self.storage.get_item(&key)? else {
                continue;
            };
            let live = serde_json::from_str::<StoredExpiry>(&raw)
                .map(|stored| stored.expires_at >= now)
                .unwrap_or(false);
            if !live {
                self.storage.remove_item(&key)?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    pub fn size(&self) -> usize {
        self.memory.size()
    }

    pub fn stats(&self) -> CacheStats {
        self.memory.stats()
    }

    /// Destroy the memory tier; persisted entries are left for the next process.
    pub fn destroy(&self) {
        self.memory.destroy();
    }

    fn persist(&self, key: &str, value: &V, expires_at: u64) -> Result<(), PersistentCacheError> {
        let encoded = serde_json::to_string(&StoredEntry { value, expires_at })?;
        let storage_key = self.storage_key(key);
        self.ensure_capacity(&storage_key)?;
        match self.storage.set_item(&storage_key, &encoded) {
            Ok(()) => Ok(()),
            Err(StorageError::QuotaExceeded { .. }) => {
                let purged = self.purge_expired()?;
                warn!(namespace = %self.namespace, key, purged, "storage quota exceeded; retrying");
                self.storage.set_item(&storage_key, &encoded).map_err(|error| match error {
                    StorageError::QuotaExceeded { .. } => {
                        PersistentCacheError::QuotaExceeded { key: key.to_string() }
                    }
                    other => other.into(),
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    fn ensure_capacity(&self, storage_key: &str) -> Result<(), PersistentCacheError> {
        let max_size = self.memory.config().max_size();
        let keys = self.namespaced_keys()?;
        if keys.len() < max_size || keys.iter().any(|k| k == storage_key) {
            return Ok(());
        }
        self.purge_expired()?;
        if self.namespaced_keys()?.len() < max_size {
            Ok(())
        } else {
            Err(PersistentCacheError::Capacity { max_size })
        }
    }

    fn discard(&self, storage_key: &str) {
        if let Err(error) = self.storage.remove_item(storage_key) {
            warn!(namespace = %self.namespace, storage_key, %error, "persistent remove failed");
        }
    }

    fn namespaced_keys(&self) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{}:", self.namespace);
        Ok(self.storage.keys()?.into_iter().filter(|k| k.starts_with(&prefix)).collect())
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

impl<V> ManagedCache for PersistentCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    fn stats(&self) -> CacheStats {
        self.memory.stats()
    }

    fn shutdown(&self) {
        match self.flush() {
            Ok(written) => tracing::debug!(namespace = %self.namespace, written, "flushed cache"),
            Err(error) => warn!(namespace = %self.namespace, %error, "flush on shutdown failed"),
        }
        self.destroy();
    }
}

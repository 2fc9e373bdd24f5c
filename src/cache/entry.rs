//! Cache Entry Module
//!
//! A stored value plus the bookkeeping the eviction policy needs.

use std::time::Duration;

use crate::clock::duration_millis;

// == Cache Entry ==
/// A single cached value with TTL and access metadata. Timestamps are clock milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: u64,
    /// Last instant the entry is readable.
    pub expires_at: u64,
    pub access_count: u64,
    pub last_accessed_at: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    pub fn new(value: V, now: u64, ttl: Duration) -> Self {
        Self {
            value,
            created_at: now,
            expires_at: now.saturating_add(duration_millis(ttl)),
            access_count: 0,
            last_accessed_at: now,
        }
    }

    /// Entry with an absolute expiry, used when rehydrating from storage.
    pub fn expiring_at(value: V, now: u64, expires_at: u64) -> Self {
        Self { value, created_at: now, expires_at, access_count: 0, last_accessed_at: now }
    }

    // == Is Expired ==
    /// Expired strictly after `expires_at`; an entry read exactly at its deadline is still live.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    // == Time To Live ==
    pub fn ttl_remaining(&self, now: u64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now))
    }

    /// Record a read.
    pub(crate) fn touch(&mut self, now: u64) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = now;
    }
}

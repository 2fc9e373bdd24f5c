//! Cache Statistics Module
//!
//! Counters are maintained incrementally so a snapshot is O(1).

use serde::Serialize;

// == Counters ==
/// Running totals kept alongside the entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Sum of `access_count` over live entries.
    pub total_access: u64,
}

impl Counters {
    pub fn record_hit(&mut self) {
        self.hits += 1;
        self.total_access = self.total_access.saturating_add(1);
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self, access_count: u64) {
        self.evictions += 1;
        self.forget(access_count);
    }

    pub fn record_expiration(&mut self, access_count: u64) {
        self.expirations += 1;
        self.forget(access_count);
    }

    /// Drop a removed entry's accesses from the running total.
    pub fn forget(&mut self, access_count: u64) {
        self.total_access = self.total_access.saturating_sub(access_count);
    }
}

// == Cache Stats ==
/// Point-in-time view of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    /// `size / max_size × 100`.
    pub utilization_percent: f64,
    /// Mean reads per live entry.
    pub average_access_count: f64,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to get back under capacity.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    pub(crate) fn from_counters(size: usize, max_size: usize, counters: &Counters) -> Self {
        let utilization_percent =
            if max_size == 0 { 0.0 } else { size as f64 / max_size as f64 * 100.0 };
        let average_access_count =
            if size == 0 { 0.0 } else { counters.total_access as f64 / size as f64 };
        Self {
            size,
            max_size,
            utilization_percent,
            average_access_count,
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            expirations: counters.expirations,
        }
    }

    // == Hit Rate ==
    /// hits / (hits + misses), or 0.0 before any read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

//! Registry of per-key circuit breakers.
//!
//! Breakers are created lazily the first time a key is seen and live as long as the registry.
//! Key cardinality is unbounded; keys are expected to name a small, known set of integration
//! endpoints.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use crate::circuit_breaker::{Breaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
use crate::clock::{Clock, MonotonicClock};

/// Errors from breaker registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerRegistryError {
    /// No breaker has been created for the key yet.
    #[error("circuit breaker '{key}' not found")]
    NotFound { key: String },
}

/// Process-wide set of breakers sharing one configuration and clock.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<Breaker>>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::default()))
    }

    /// Registry whose breakers read time from `clock`.
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { breakers: RwLock::new(HashMap::new()), config, clock }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Breaker for `key`, created on first use.
    pub fn breaker(&self, key: &str) -> Arc<Breaker> {
        if let Some(existing) = self.read().get(key) {
            return existing.clone();
        }
        let mut map = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(key.to_string())
            .or_insert_with(|| {
                tracing::debug!(key, "creating circuit breaker");
                Arc::new(Breaker::with_clock(key, self.config, self.clock.clone()))
            })
            .clone()
    }

    /// Whether a call for `key` may proceed right now.
    pub fn allow(&self, key: &str) -> bool {
        self.breaker(key).allow()
    }

    /// Record the terminal outcome of a call for `key`.
    pub fn report(&self, key: &str, success: bool) {
        self.breaker(key).report(success);
    }

    /// Current state of `key`, if a breaker exists for it.
    pub fn state(&self, key: &str) -> Option<CircuitState> {
        self.read().get(key).map(|b| b.state())
    }

    /// Snapshot of every breaker, ordered by key.
    pub fn stats(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.read().iter().map(|(k, b)| (k.clone(), b.snapshot())).collect()
    }

    /// Reset a breaker to Closed, erroring if the key was never used.
    pub fn reset(&self, key: &str) -> Result<(), CircuitBreakerRegistryError> {
        match self.read().get(key) {
            Some(breaker) => {
                breaker.reset();
                tracing::info!(key, "circuit breaker reset");
                Ok(())
            }
            None => Err(CircuitBreakerRegistryError::NotFound { key: key.to_string() }),
        }
    }

    /// Reset every known breaker.
    pub fn reset_all(&self) {
        for breaker in self.read().values() {
            breaker.reset();
        }
    }

    /// Number of keys seen so far.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Breaker>>> {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner)
    }
}

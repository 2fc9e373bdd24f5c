//! Per-process resilience context.
//!
//! Owns the breaker registry, the retry executor and every named cache, and is constructed once
//! at startup and passed by reference. The host calls [`Resilience::shutdown`] from its own
//! graceful-shutdown sequence; nothing here installs signal handlers.
//!
//! ```rust
//! use storeguard::{InstantSleeper, Resilience, ResilienceConfig};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let resilience = Resilience::builder()
//!     .config(ResilienceConfig::from_json(r#"{ "cache": { "max_size": 100 } }"#).unwrap())
//!     .sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let products = resilience.create_cache::<String>("products").unwrap();
//! products.set("sku-1", "Blue mug".to_string(), None);
//! assert_eq!(resilience.cache_stats()["products"].size, 1);
//! resilience.shutdown();
//! assert_eq!(products.size(), 0);
//! # });
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{BoundedCache, CacheConfig, CacheStats, ManagedCache, PersistentCache, Storage};
use crate::circuit_breaker::CircuitSnapshot;
use crate::circuit_breaker_registry::{CircuitBreakerRegistry, CircuitBreakerRegistryError};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, ResilienceConfig};
use crate::http::ResilientHttp;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::{ResilienceError, Sleeper, TokioSleeper};

/// Errors from registering caches with a [`Resilience`] context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("cache '{0}' is already registered")]
    DuplicateCache(String),
    #[error("resilience context has been shut down")]
    ShutDown,
}

/// The process-wide resilience layer.
pub struct Resilience {
    config: ResilienceConfig,
    clock: Arc<dyn Clock>,
    breakers: Arc<CircuitBreakerRegistry>,
    executor: RetryExecutor,
    caches: Mutex<BTreeMap<String, Arc<dyn ManagedCache>>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for Resilience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resilience")
            .field("config", &self.config)
            .field("breakers", &self.breakers.len())
            .field("caches", &self.cache_names())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Builder for [`Resilience`].
#[derive(Debug, Default)]
pub struct ResilienceBuilder {
    config: ResilienceConfig,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl ResilienceBuilder {
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source for breakers and caches; defaults to wall-clock time.
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Backoff sleeper; defaults to `tokio::time::sleep`.
    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Validate the configuration and assemble the context.
    pub fn build(self) -> Result<Resilience, ConfigError> {
        let breaker_config = self.config.breaker_config()?;
        self.config.cache_config()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let breakers = Arc::new(CircuitBreakerRegistry::with_clock(breaker_config, clock.clone()));
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));
        let executor = RetryExecutor::new(breakers.clone()).with_shared_sleeper(sleeper);
        Ok(Resilience {
            config: self.config,
            clock,
            breakers,
            executor,
            caches: Mutex::new(BTreeMap::new()),
            shut_down: AtomicBool::new(false),
        })
    }
}

impl Resilience {
    pub fn builder() -> ResilienceBuilder {
        ResilienceBuilder::default()
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// HTTP adapter sharing this context's breakers.
    pub fn http(&self) -> ResilientHttp {
        ResilientHttp::new(self.executor.clone())
    }

    /// Shorthand for [`RetryExecutor::run`].
    pub async fn run<T, E, Fut, Op>(
        &self,
        operation: Op,
        config: &RetryConfig<E>,
        key: Option<&str>,
    ) -> Result<T, ResilienceError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.executor.run(operation, config, key).await
    }

    pub fn circuit_stats(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.breakers.stats()
    }

    pub fn circuit_reset(&self, key: &str) -> Result<(), CircuitBreakerRegistryError> {
        self.breakers.reset(key)
    }

    /// Create and register a bounded cache using the configured cache defaults.
    pub fn create_cache<V>(&self, name: &str) -> Result<Arc<BoundedCache<V>>, RegistryError>
    where
        V: Send + 'static,
    {
        let config = self.default_cache_config();
        self.create_cache_with(name, config)
    }

    /// Create and register a bounded cache with explicit settings.
    pub fn create_cache_with<V>(
        &self,
        name: &str,
        config: CacheConfig,
    ) -> Result<Arc<BoundedCache<V>>, RegistryError>
    where
        V: Send + 'static,
    {
        let cache = Arc::new(BoundedCache::with_clock(config, self.clock.clone()));
        self.register_cache(name, cache.clone())?;
        self.maybe_spawn_cleanup(&cache);
        Ok(cache)
    }

    /// Create and register a write-through cache persisted under `name` in `storage`.
    pub fn create_persistent_cache<V>(
        &self,
        name: &str,
        storage: Arc<dyn Storage>,
    ) -> Result<Arc<PersistentCache<V>>, RegistryError>
    where
        V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let cache = Arc::new(PersistentCache::with_clock(
            name,
            self.default_cache_config(),
            storage,
            self.clock.clone(),
        ));
        self.register_cache(name, cache.clone())?;
        self.maybe_spawn_cleanup(cache.memory());
        Ok(cache)
    }

    /// Put an externally built cache under this context's lifecycle.
    pub fn register_cache(
        &self,
        name: &str,
        cache: Arc<dyn ManagedCache>,
    ) -> Result<(), RegistryError> {
        let mut caches = self.caches();
        if self.is_shut_down() {
            return Err(RegistryError::ShutDown);
        }
        if caches.contains_key(name) {
            return Err(RegistryError::DuplicateCache(name.to_string()));
        }
        caches.insert(name.to_string(), cache);
        debug!(name, "cache registered");
        Ok(())
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.caches().keys().cloned().collect()
    }

    pub fn cache_stats(&self) -> BTreeMap<String, CacheStats> {
        self.caches().iter().map(|(name, cache)| (name.clone(), cache.stats())).collect()
    }

    /// Flush persistent caches, destroy every registered cache and deregister them.
    /// Later calls are no-ops.
    pub fn shutdown(&self) {
        let caches = {
            let mut caches = self.caches();
            if self.shut_down.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *caches)
        };
        let count = caches.len();
        for (name, cache) in caches {
            debug!(name = %name, "shutting down cache");
            cache.shutdown();
        }
        info!(caches = count, "resilience context shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn default_cache_config(&self) -> CacheConfig {
        // Validated in `ResilienceBuilder::build`.
        self.config.cache_config().unwrap_or_default()
    }

    fn maybe_spawn_cleanup<V: Send + 'static>(&self, cache: &Arc<BoundedCache<V>>) {
        if self.config.spawn_cache_cleanup && tokio::runtime::Handle::try_current().is_ok() {
            cache.spawn_cleanup();
        }
    }

    fn caches(&self) -> MutexGuard<'_, BTreeMap<String, Arc<dyn ManagedCache>>> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Resilience {
    fn drop(&mut self) {
        self.shutdown();
    }
}

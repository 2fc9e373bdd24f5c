#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # storeguard
//!
//! Resilient-operation layer for storefront integrations: a retry executor with per-key circuit
//! breakers, an HTTP adapter that classifies status codes, and a bounded TTL cache with
//! operation locks.
//!
//! ## Features
//!
//! - **Retry** with capped exponential backoff and ±25% jitter
//! - **Circuit breakers** per operation key, lock-free, with single-probe half-open recovery
//! - **Named profiles** (`network`, `database`, `external_api`, `file_system`, `critical`)
//! - **Typed failure classification** instead of error-message matching
//! - **Bounded cache** with TTL expiry, access-count eviction and a background sweep
//! - **Persistent cache** writing through to a key/value storage backend
//!
//! ## Quick Start
//!
//! ```rust
//! use storeguard::{Resilience, RetryConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let resilience = Resilience::builder().build().unwrap();
//!     let config = RetryConfig::<std::io::Error>::builder()
//!         .max_attempts(3)
//!         .base_delay(Duration::from_millis(10))
//!         .build()
//!         .unwrap();
//!
//!     let result = resilience
//!         .run(|| async { Ok::<_, std::io::Error>("catalog") }, &config, Some("products"))
//!         .await;
//!     assert_eq!(result.unwrap(), "catalog");
//! }
//! ```

pub mod backoff;
pub mod cache;
pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod jitter;
pub mod prelude;
pub mod profiles;
pub mod retry;
pub mod runtime;
pub mod sleeper;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use cache::{
    BoundedCache, CacheConfig, CacheConfigError, CacheEntry, CacheStats, KeyLock, ManagedCache,
    MemoryStorage, PersistentCache, PersistentCacheError, Storage, StorageError,
};
pub use circuit_breaker::{
    Admission, Breaker, CircuitBreakerConfig, CircuitBreakerError, CircuitSnapshot, CircuitState,
};
pub use circuit_breaker_registry::{CircuitBreakerRegistry, CircuitBreakerRegistryError};
pub use classify::{Classify, FailureKind};
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use config::{ConfigError, ResilienceConfig};
pub use error::ResilienceError;
pub use http::{HttpError, ResilientHttp};
pub use jitter::Jitter;
pub use profiles::{ProfileSettings, RetryProfile};
pub use retry::{BuildError, RetryConfig, RetryConfigBuilder, RetryExecutor};
pub use runtime::{RegistryError, Resilience, ResilienceBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};

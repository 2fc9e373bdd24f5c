//! Convenient re-exports for common storeguard types.
pub use crate::{
    cache::{BoundedCache, CacheConfig, CacheStats, PersistentCache},
    circuit_breaker::{CircuitBreakerConfig, CircuitState},
    classify::{Classify, FailureKind},
    http::{HttpError, ResilientHttp},
    profiles::RetryProfile,
    retry::{RetryConfig, RetryExecutor},
    runtime::Resilience,
    Jitter, ResilienceError,
};

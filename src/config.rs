//! Process-level configuration, loadable from JSON.
//!
//! Every field has a default, so `{}` is a valid document. Durations are integer milliseconds.
//! Validation happens once, when the config is turned into component configs.
//!
//! ```rust
//! use storeguard::ResilienceConfig;
//!
//! let config = ResilienceConfig::from_json(r#"{ "cache": { "max_size": 250 } }"#).unwrap();
//! assert_eq!(config.cache.max_size, 250);
//! assert_eq!(config.circuit_breaker.failure_threshold, 5);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::{CacheConfig, CacheConfigError};
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError};
use crate::clock::duration_millis;

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid circuit breaker settings: {0}")]
    CircuitBreaker(#[from] CircuitBreakerError),
    #[error("invalid cache settings: {0}")]
    Cache(#[from] CacheConfigError),
}

/// Breaker settings shared by every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub open_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold(),
            open_timeout_ms: duration_millis(defaults.open_timeout()),
        }
    }
}

/// Defaults for caches created through the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub max_size: usize,
    pub default_ttl_ms: u64,
    pub cleanup_interval_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            max_size: defaults.max_size(),
            default_ttl_ms: duration_millis(defaults.default_ttl()),
            cleanup_interval_ms: duration_millis(defaults.cleanup_interval()),
        }
    }
}

/// Top-level configuration for a [`Resilience`](crate::Resilience) context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceConfig {
    pub circuit_breaker: BreakerSettings,
    pub cache: CacheSettings,
    /// Start the periodic sweep for caches created by the runtime.
    pub spawn_cache_cleanup: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: BreakerSettings::default(),
            cache: CacheSettings::default(),
            spawn_cache_cleanup: true,
        }
    }
}

impl ResilienceConfig {
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(document)?)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.breaker_config()?;
        self.cache_config()?;
        Ok(())
    }

    pub fn breaker_config(&self) -> Result<CircuitBreakerConfig, ConfigError> {
        Ok(CircuitBreakerConfig::new(
            self.circuit_breaker.failure_threshold,
            Duration::from_millis(self.circuit_breaker.open_timeout_ms),
        )?)
    }

    pub fn cache_config(&self) -> Result<CacheConfig, ConfigError> {
        Ok(CacheConfig::new(
            self.cache.max_size,
            Duration::from_millis(self.cache.default_ttl_ms),
            Duration::from_millis(self.cache.cleanup_interval_ms),
        )?)
    }
}

//! Named retry profiles for the integration families the storefront talks to.
//!
//! Profiles differ only in attempt count, delay bounds and which [`FailureKind`]s they retry. They
//! are built directly from constants, so obtaining one never fails.
//!
//! | Profile | attempts | base | max | multiplier |
//! |---|---|---|---|---|
//! | `network` | 3 | 1s | 10s | 2.0 |
//! | `database` | 3 | 500ms | 5s | 2.0 |
//! | `external_api` | 4 | 2s | 30s | 2.0 |
//! | `file_system` | 2 | 100ms | 1s | 2.0 |
//! | `critical` | 5 | 1s | 60s | 1.5 |
//!
//! ```rust
//! use storeguard::{FailureKind, RetryProfile};
//!
//! assert!(RetryProfile::Network.retries(FailureKind::RateLimited));
//! assert!(!RetryProfile::Network.retries(FailureKind::Validation));
//! assert_eq!(RetryProfile::Database.settings().max_attempts, 3);
//! ```

use crate::backoff::Backoff;
use crate::classify::{Classify, FailureKind};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::{Jitter, ResilienceError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const NETWORK_ATTEMPTS: usize = 3;
const NETWORK_BASE_MILLIS: u64 = 1_000;
const NETWORK_MAX_MILLIS: u64 = 10_000;

const DATABASE_ATTEMPTS: usize = 3;
const DATABASE_BASE_MILLIS: u64 = 500;
const DATABASE_MAX_MILLIS: u64 = 5_000;

const EXTERNAL_API_ATTEMPTS: usize = 4;
const EXTERNAL_API_BASE_MILLIS: u64 = 2_000;
const EXTERNAL_API_MAX_MILLIS: u64 = 30_000;

const FILE_SYSTEM_ATTEMPTS: usize = 2;
const FILE_SYSTEM_BASE_MILLIS: u64 = 100;
const FILE_SYSTEM_MAX_MILLIS: u64 = 1_000;

const CRITICAL_ATTEMPTS: usize = 5;
const CRITICAL_BASE_MILLIS: u64 = 1_000;
const CRITICAL_MAX_MILLIS: u64 = 60_000;
const CRITICAL_MULTIPLIER: f64 = 1.5;

const NETWORK_KINDS: &[FailureKind] = &[
    FailureKind::Timeout,
    FailureKind::Connection,
    FailureKind::Network,
    FailureKind::RateLimited,
    FailureKind::Server,
];

const DATABASE_KINDS: &[FailureKind] =
    &[FailureKind::Timeout, FailureKind::Connection, FailureKind::Deadlock, FailureKind::Busy];

const FILE_SYSTEM_KINDS: &[FailureKind] = &[FailureKind::Busy, FailureKind::Timeout];

/// Preconfigured retry behaviour for a family of operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryProfile {
    /// HTTP and socket calls.
    Network,
    /// Queries against the primary datastore.
    Database,
    /// Slow third-party APIs with generous limits.
    ExternalApi,
    /// Local file access.
    FileSystem,
    /// Must-succeed paths: more attempts, gentler growth, every transient kind retried.
    Critical,
}

/// Numeric settings of a profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileSettings {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryProfile {
    pub const ALL: [RetryProfile; 5] = [
        RetryProfile::Network,
        RetryProfile::Database,
        RetryProfile::ExternalApi,
        RetryProfile::FileSystem,
        RetryProfile::Critical,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RetryProfile::Network => "network",
            RetryProfile::Database => "database",
            RetryProfile::ExternalApi => "external_api",
            RetryProfile::FileSystem => "file_system",
            RetryProfile::Critical => "critical",
        }
    }

    pub fn settings(self) -> ProfileSettings {
        let (max_attempts, base, max, multiplier) = match self {
            RetryProfile::Network => (NETWORK_ATTEMPTS, NETWORK_BASE_MILLIS, NETWORK_MAX_MILLIS, 2.0),
            RetryProfile::Database => {
                (DATABASE_ATTEMPTS, DATABASE_BASE_MILLIS, DATABASE_MAX_MILLIS, 2.0)
            }
            RetryProfile::ExternalApi => {
                (EXTERNAL_API_ATTEMPTS, EXTERNAL_API_BASE_MILLIS, EXTERNAL_API_MAX_MILLIS, 2.0)
            }
            RetryProfile::FileSystem => {
                (FILE_SYSTEM_ATTEMPTS, FILE_SYSTEM_BASE_MILLIS, FILE_SYSTEM_MAX_MILLIS, 2.0)
            }
            RetryProfile::Critical => {
                (CRITICAL_ATTEMPTS, CRITICAL_BASE_MILLIS, CRITICAL_MAX_MILLIS, CRITICAL_MULTIPLIER)
            }
        };
        ProfileSettings {
            max_attempts,
            base_delay: Duration::from_millis(base),
            max_delay: Duration::from_millis(max),
            multiplier,
        }
    }

    /// Whether this profile retries failures of `kind`.
    pub fn retries(self, kind: FailureKind) -> bool {
        match self {
            RetryProfile::Network => NETWORK_KINDS.contains(&kind),
            RetryProfile::Database => DATABASE_KINDS.contains(&kind),
            RetryProfile::ExternalApi => {
                NETWORK_KINDS.contains(&kind) || kind == FailureKind::Decode
            }
            RetryProfile::FileSystem => FILE_SYSTEM_KINDS.contains(&kind),
            RetryProfile::Critical => !kind.is_permanent(),
        }
    }

    /// Retry config for errors that can classify themselves.
    pub fn config<E>(self) -> RetryConfig<E>
    where
        E: Classify + 'static,
    {
        let settings = self.settings();
        let backoff =
            Backoff::from_parts(settings.base_delay, settings.max_delay, settings.multiplier);
        RetryConfig::from_parts(
            settings.max_attempts,
            backoff,
            Jitter::default(),
            Arc::new(move |e: &E| self.retries(e.failure_kind())),
        )
    }
}

impl RetryExecutor {
    /// Run `operation` under `profile`.
    pub async fn run_profile<T, E, Fut, Op>(
        &self,
        profile: RetryProfile,
        operation: Op,
        key: Option<&str>,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify + 'static,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let config = profile.config::<E>();
        self.run(operation, &config, key).await
    }

    pub async fn network<T, E, Fut, Op>(
        &self,
        operation: Op,
        key: Option<&str>,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify + 'static,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_profile(RetryProfile::Network, operation, key).await
    }

    pub async fn database<T, E, Fut, Op>(
        &self,
        operation: Op,
        key: Option<&str>,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify + 'static,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_profile(RetryProfile::Database, operation, key).await
    }

    pub async fn external_api<T, E, Fut, Op>(
        &self,
        operation: Op,
        key: Option<&str>,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify + 'static,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_profile(RetryProfile::ExternalApi, operation, key).await
    }

    pub async fn file_system<T, E, Fut, Op>(
        &self,
        operation: Op,
        key: Option<&str>,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify + 'static,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_profile(RetryProfile::FileSystem, operation, key).await
    }

    pub async fn critical<T, E, Fut, Op>(
        &self,
        operation: Op,
        key: Option<&str>,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify + 'static,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_profile(RetryProfile::Critical, operation, key).await
    }
}

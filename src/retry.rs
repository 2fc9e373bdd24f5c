//! Retry executor for fallible async operations, guarded by per-key circuit breakers.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - The breaker for the call's key is consulted once, before the first attempt. An open breaker
//!   fails the call with [`ResilienceError::CircuitOpen`] without invoking the operation.
//! - After a failed attempt the `retryable` predicate decides whether to try again. Giving up
//!   (non-retryable error or last attempt) reports a failure to the breaker and returns the
//!   operation's error untouched as [`ResilienceError::Inner`].
//! - Between attempts the executor sleeps for the backoff delay with jitter applied; this is the
//!   only suspension point besides the operation itself.
//!
//! Invariants:
//! - Attempts are strictly sequential and never exceed `max_attempts`.
//! - Exactly one outcome is reported to the breaker per admitted call.
//!
//! Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use storeguard::{CircuitBreakerRegistry, InstantSleeper, RetryConfig, RetryExecutor};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let executor = RetryExecutor::new(Arc::new(CircuitBreakerRegistry::default()))
//!     .with_sleeper(InstantSleeper);
//! let config = RetryConfig::<std::io::Error>::builder()
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(100))
//!     .build()
//!     .unwrap();
//! let value = executor.run(|| async { Ok::<_, std::io::Error>(7) }, &config, Some("demo")).await;
//! assert_eq!(value.unwrap(), 7);
//! # });
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::circuit_breaker::{Admission, Breaker};
use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::{Jitter, ResilienceError, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Breaker key used when a call does not name one.
pub const DEFAULT_OPERATION_KEY: &str = "default";

/// Decides whether an operation error is worth another attempt.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
/// Observes each scheduled retry with the attempt number that just failed.
pub type RetryObserver<E> = Arc<dyn Fn(usize, &E) + Send + Sync>;

/// Immutable per-call retry configuration.
pub struct RetryConfig<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    retryable: RetryPredicate<E>,
    on_retry: Option<RetryObserver<E>>,
}

impl<E> Clone for RetryConfig<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            retryable: self.retryable.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryConfig<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("retryable", &"<predicate>")
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<observer>"))
            .finish()
    }
}

impl<E: 'static> RetryConfig<E> {
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryConfigBuilder<E> {
        RetryConfigBuilder::new()
    }
}

impl<E> RetryConfig<E> {
    /// Assemble a config from parts already known to be valid.
    pub(crate) fn from_parts(
        max_attempts: usize,
        backoff: Backoff,
        jitter: Jitter,
        retryable: RetryPredicate<E>,
    ) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff, jitter, retryable, on_retry: None }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    pub fn is_retryable(&self, error: &E) -> bool {
        (self.retryable)(error)
    }

    /// Same settings with a different jitter strategy.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Same settings with an observer invoked before each retry.
    pub fn with_on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(usize, &E) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Jittered delay to wait after `attempt` failed.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt))
    }

    fn notify_retry(&self, attempt: usize, error: &E) {
        if let Some(observer) = &self.on_retry {
            observer(attempt, error);
        }
    }
}

/// Errors produced while building a retry config.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error(transparent)]
    Backoff(#[from] BackoffError),
}

/// Builder for [`RetryConfig`].
pub struct RetryConfigBuilder<E> {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: Jitter,
    retryable: RetryPredicate<E>,
    on_retry: Option<RetryObserver<E>>,
}

impl<E: 'static> RetryConfigBuilder<E> {
    /// Defaults: 3 attempts, 1s base, 10s cap, ×2, ±25% jitter, every error retryable.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: Jitter::default(),
            retryable: Arc::new(|_| true),
            on_retry: None,
        }
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Delay before the second attempt; clamped to 30s.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Cap for any single delay; clamped to 60s.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Predicate deciding whether an error is retryable.
    pub fn retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Observer called with `(failed_attempt, error)` before each backoff sleep.
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(usize, &E) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Build the config, validating inputs.
    pub fn build(self) -> Result<RetryConfig<E>, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        let backoff = Backoff::exponential(self.base_delay)
            .with_multiplier(self.multiplier)?
            .with_max(self.max_delay)?;
        Ok(RetryConfig {
            max_attempts: self.max_attempts,
            backoff,
            jitter: self.jitter,
            retryable: self.retryable,
            on_retry: self.on_retry,
        })
    }
}

impl<E: 'static> Default for RetryConfigBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs operations with bounded attempts, backoff and circuit breaking.
///
/// Clones share the breaker registry.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    breakers: Arc<CircuitBreakerRegistry>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(CircuitBreakerRegistry::default()))
    }
}

/// Reports the call outcome to its breaker exactly once; an unreported drop (the caller gave up on
/// the future) hands the half-open probe slot back if this call held it.
struct CallOutcome {
    breaker: Arc<Breaker>,
    admission: Admission,
    reported: bool,
}

impl CallOutcome {
    fn report(&mut self, success: bool) {
        self.reported = true;
        self.breaker.report(success);
    }
}

impl Drop for CallOutcome {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.release(self.admission);
        }
    }
}

impl RetryExecutor {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { breakers, sleeper: Arc::new(TokioSleeper) }
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Execute `operation` under `config`, guarded by the breaker for `key`
    /// (or [`DEFAULT_OPERATION_KEY`]).
    pub async fn run<T, E, Fut, Op>(
        &self,
        mut operation: Op,
        config: &RetryConfig<E>,
        key: Option<&str>,
    ) -> Result<T, ResilienceError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = key.unwrap_or(DEFAULT_OPERATION_KEY);
        let breaker = self.breakers.breaker(key);
        let Some(admission) = breaker.admit() else {
            tracing::debug!(key, "circuit open; rejecting call without attempting it");
            return Err(ResilienceError::CircuitOpen {
                key: key.to_string(),
                failure_count: breaker.failure_count(),
                retry_after: breaker.retry_after(),
            });
        };

        let mut outcome = CallOutcome { breaker, admission, reported: false };
        let mut attempt = 0;
        loop {
            attempt += 1;
            let delay = match operation().await {
                Ok(value) => {
                    outcome.report(true);
                    return Ok(value);
                }
                Err(error) => {
                    let retryable = config.is_retryable(&error);
                    if !retryable || attempt >= config.max_attempts {
                        outcome.report(false);
                        tracing::warn!(key, attempts = attempt, retryable, "operation failed");
                        return Err(ResilienceError::Inner(error));
                    }
                    let delay = config.delay_after(attempt);
                    config.notify_retry(attempt, &error);
                    delay
                }
            };
            tracing::debug!(
                key,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying after failure"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::clock::ManualClock;
    use crate::{InstantSleeper, TrackingSleeper};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError {
        attempt: usize,
        transient: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError on attempt {}", self.attempt)
        }
    }

    impl std::error::Error for TestError {}

    fn executor() -> (RetryExecutor, ManualClock, TrackingSleeper) {
        let clock = ManualClock::new();
        let sleeper = TrackingSleeper::new();
        let registry = CircuitBreakerRegistry::with_clock(
            CircuitBreakerConfig::default(),
            Arc::new(clock.clone()),
        );
        let executor = RetryExecutor::new(Arc::new(registry)).with_sleeper(sleeper.clone());
        (executor, clock, sleeper)
    }

    fn config(max_attempts: usize) -> RetryConfig<TestError> {
        RetryConfig::builder()
            .max_attempts(max_attempts)
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(1000))
            .backoff_multiplier(2.0)
            .with_jitter(Jitter::None)
            .retryable(|e: &TestError| e.transient)
            .build()
            .expect("builder")
    }

    #[tokio::test]
    async fn success_first_attempt() {
        let (executor, _, sleeper) = executor();
        let counter = AtomicUsize::new(0);

        let result = executor
            .run(
                || async {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(42)
                },
                &config(3),
                Some("k"),
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(sleeper.call_count(), 0);
    }

    #[tokio::test]
    async fn exhaustion_returns_the_last_original_error() {
        let (executor, _, sleeper) = executor();
        let counter = AtomicUsize::new(0);

        let result = executor
            .run(
                || async {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err::<(), _>(TestError { attempt, transient: true })
                },
                &config(4),
                Some("k"),
            )
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(result, Err(ResilienceError::Inner(TestError { attempt: 4, transient: true })));
        assert_eq!(sleeper.call_count(), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_is_attempted_once() {
        let (executor, _, sleeper) = executor();
        let counter = AtomicUsize::new(0);

        let result = executor
            .run(
                || async {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError { attempt: 1, transient: false })
                },
                &config(10),
                None,
            )
            .await;

        assert!(result.unwrap_err().is_inner());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(sleeper.call_count(), 0);
    }

    #[tokio::test]
    async fn nominal_delays_grow_and_cap() {
        let (executor, _, sleeper) = executor();

        let _ = executor
            .run(
                || async { Err::<(), _>(TestError { attempt: 0, transient: true }) },
                &config(7),
                Some("k"),
            )
            .await;

        let expected: Vec<Duration> =
            [100, 200, 400, 800, 1000, 1000].into_iter().map(Duration::from_millis).collect();
        assert_eq!(sleeper.calls(), expected);
    }

    #[tokio::test]
    async fn jittered_delays_stay_in_band() {
        let (executor, _, sleeper) = executor();
        let config = config(6).with_jitter(Jitter::default());

        let _ = executor
            .run(
                || async { Err::<(), _>(TestError { attempt: 0, transient: true }) },
                &config,
                Some("k"),
            )
            .await;

        for (idx, observed) in sleeper.calls().into_iter().enumerate() {
            let nominal = config.backoff().delay(idx + 1);
            let (lo, hi) = Jitter::default().bounds(nominal);
            assert!(observed >= lo && observed <= hi, "{observed:?} outside {lo:?}..={hi:?}");
        }
    }

    #[tokio::test]
    async fn on_retry_sees_each_failed_attempt() {
        let (executor, _, _) = executor();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let config = config(3).with_on_retry(move |attempt, e: &TestError| {
            sink.lock().unwrap().push((attempt, e.attempt));
        });
        let counter = AtomicUsize::new(0);

        let _ = executor
            .run(
                || async {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err::<(), _>(TestError { attempt, transient: true })
                },
                &config,
                Some("k"),
            )
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![(1, 1), (2, 2)]);
    }

    #[tokio::test]
    async fn breaker_opens_after_five_failed_calls_and_short_circuits() {
        let (executor, _, _) = executor();
        let counter = AtomicUsize::new(0);
        let op = || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TestError { attempt: 1, transient: false })
        };

        for _ in 0..5 {
            assert!(executor.run(op, &config(1), Some("products")).await.unwrap_err().is_inner());
        }
        assert_eq!(executor.breakers().state("products"), Some(CircuitState::Open));

        let result = executor.run(op, &config(1), Some("products")).await;
        let err = result.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(err.circuit_open_details().map(|(k, _)| k), Some("products"));
        assert_eq!(counter.load(Ordering::SeqCst), 5, "open circuit must not invoke the operation");
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_the_breaker() {
        let (executor, clock, _) = executor();
        for _ in 0..5 {
            let _ = executor
                .run(
                    || async { Err::<(), _>(TestError { attempt: 1, transient: false }) },
                    &config(1),
                    Some("reviews"),
                )
                .await;
        }
        clock.advance(Duration::from_millis(60_001));

        let result =
            executor.run(|| async { Ok::<_, TestError>("fresh") }, &config(1), Some("reviews")).await;

        assert_eq!(result.unwrap(), "fresh");
        let snapshot = executor.breakers().stats()["reviews"];
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failures, 0);
    }

    #[tokio::test]
    async fn abandoned_probe_releases_half_open_slot() {
        let (executor, clock, _) = executor();
        executor.breakers().breaker("slow").reset();
        for _ in 0..5 {
            executor.breakers().report("slow", false);
        }
        clock.advance(Duration::from_millis(60_001));

        let single = config(1);
        let never = executor.run(
            || futures::future::pending::<Result<(), TestError>>(),
            &single,
            Some("slow"),
        );
        assert!(never.now_or_never().is_none());
        assert_eq!(executor.breakers().state("slow"), Some(CircuitState::HalfOpen));

        let result =
            executor.run(|| async { Ok::<_, TestError>(()) }, &config(1), Some("slow")).await;
        assert!(result.is_ok(), "slot should have been released");
    }

    #[tokio::test]
    async fn dropping_a_call_admitted_while_closed_keeps_half_open_exclusive() {
        let (executor, clock, _) = executor();
        let single = config(1);
        let mut stale = Box::pin(executor.run(
            || futures::future::pending::<Result<(), TestError>>(),
            &single,
            Some("stock"),
        ));
        assert!(stale.as_mut().now_or_never().is_none());

        for _ in 0..5 {
            executor.breakers().report("stock", false);
        }
        clock.advance(Duration::from_millis(60_001));
        assert!(executor.breakers().allow("stock"));
        assert!(!executor.breakers().allow("stock"));

        drop(stale);
        assert!(!executor.breakers().allow("stock"), "half-open must stay single-entry");
        assert_eq!(executor.breakers().state("stock"), Some(CircuitState::HalfOpen));
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        let err = RetryConfig::<TestError>::builder().max_attempts(0).build();
        assert!(matches!(err, Err(BuildError::InvalidMaxAttempts(0))));
    }

    #[test]
    fn builder_rejects_bad_backoff() {
        let err = RetryConfig::<TestError>::builder().backoff_multiplier(0.0).build();
        assert!(matches!(err, Err(BuildError::Backoff(BackoffError::InvalidMultiplier(_)))));

        let err = RetryConfig::<TestError>::builder()
            .base_delay(Duration::from_secs(5))
            .max_delay(Duration::from_secs(1))
            .build();
        assert!(matches!(err, Err(BuildError::Backoff(BackoffError::MaxLessThanBase { .. }))));
    }

    #[test]
    fn builder_clamps_oversized_delays() {
        let config = RetryConfig::<TestError>::builder()
            .base_delay(Duration::from_secs(120))
            .max_delay(Duration::from_secs(3600))
            .build()
            .unwrap();
        assert_eq!(config.backoff().base(), Duration::from_secs(30));
        assert_eq!(config.backoff().max(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn instant_sleeper_default_path() {
        let executor = RetryExecutor::default().with_sleeper(InstantSleeper);
        let counter = AtomicUsize::new(0);
        let result = executor
            .run(
                || async {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError { attempt: 0, transient: true })
                    } else {
                        Ok(())
                    }
                },
                &config(3),
                None,
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(executor.breakers().state(DEFAULT_OPERATION_KEY), Some(CircuitState::Closed));
    }
}

//! Per-key circuit breaker state machine with lock-free atomics.
//!
//! Legal transitions: `Closed → Open → HalfOpen → Closed`, plus `HalfOpen → Open` when the probe
//! fails. [`Breaker::reset`] is the only way back to `Closed` from anywhere else.
//!
//! - **Closed**: every call is allowed. A success decays the failure counter by one (floored at
//!   zero); a failure increments it and trips the breaker once it reaches the threshold.
//! - **Open**: calls are rejected until strictly more than `open_timeout` has elapsed since the
//!   last recorded failure; the first caller after that moves the breaker to half-open.
//! - **HalfOpen**: exactly one probe is in flight. Its success closes the breaker and zeroes the
//!   counter, its failure reopens it with a fresh timestamp.

use crate::clock::{duration_millis, Clock, MonotonicClock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

const NEVER: u64 = u64::MAX;

/// Failures that trip a closed breaker by default.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Cooldown before an open breaker admits a probe by default.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the cooldown elapses.
    Open,
    /// A single probe call is testing recovery.
    HalfOpen,
}

impl CircuitState {
    fn to_u8(self) -> u8 {
        match self {
            CircuitState::Closed => STATE_CLOSED,
            CircuitState::Open => STATE_OPEN,
            CircuitState::HalfOpen => STATE_HALF_OPEN,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("failure_threshold must be > 0 (got {0})")]
    InvalidFailureThreshold(u32),
    #[error("open_timeout must be > 0 (got {0:?})")]
    InvalidOpenTimeout(Duration),
}

/// Validated configuration shared by every breaker in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    open_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Create a config with validation.
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Result<Self, CircuitBreakerError> {
        if failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold(failure_threshold));
        }
        if open_timeout.is_zero() {
            return Err(CircuitBreakerError::InvalidOpenTimeout(open_timeout));
        }
        Ok(Self { failure_threshold, open_timeout })
    }

    /// Net failures before opening from Closed.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Cooldown to stay Open before a probe is admitted.
    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: DEFAULT_FAILURE_THRESHOLD, open_timeout: DEFAULT_OPEN_TIMEOUT }
    }
}

/// How a call got past [`Breaker::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted while closed.
    Normal,
    /// Holds the single half-open probe slot.
    Probe,
}

/// Point-in-time view of one breaker, for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    /// Clock reading of the most recent failure, if any was recorded since the last reset.
    pub last_failure_millis: Option<u64>,
}

/// Breaker guarding a single operation key.
///
/// Breakers are shared through `Arc`; all handles observe the same lifecycle.
#[derive(Debug)]
pub struct Breaker {
    key: String,
    state: AtomicU8,
    failures: AtomicU32,
    last_failure_millis: AtomicU64,
    // While Open this is held `true` so the caller that wins Open → HalfOpen owns the only probe.
    probe_in_flight: AtomicBool,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl Breaker {
    /// Standalone breaker on the monotonic clock.
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(key, config, Arc::new(MonotonicClock::default()))
    }

    pub(crate) fn with_clock(
        key: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            key: key.into(),
            state: AtomicU8::new(STATE_CLOSED),
            failures: AtomicU32::new(0),
            last_failure_millis: AtomicU64::new(NEVER),
            probe_in_flight: AtomicBool::new(false),
            config,
            clock,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let last = self.last_failure_millis.load(Ordering::Acquire);
        CircuitSnapshot {
            state: self.state(),
            failures: self.failure_count(),
            last_failure_millis: (last != NEVER).then_some(last),
        }
    }

    /// Remaining cooldown while Open; zero in any other state.
    pub fn retry_after(&self) -> Duration {
        if self.state() != CircuitState::Open {
            return Duration::ZERO;
        }
        let remaining =
            duration_millis(self.config.open_timeout).saturating_sub(self.elapsed_since_failure());
        Duration::from_millis(remaining)
    }

    /// Decide whether a call may proceed, moving Open → HalfOpen when the cooldown has passed.
    pub fn allow(&self) -> bool {
        self.admit().is_some()
    }

    /// Like [`allow`](Self::allow), but says whether the caller took the half-open probe slot.
    pub fn admit(&self) -> Option<Admission> {
        loop {
            match self.state() {
                CircuitState::Closed => return Some(Admission::Normal),
                CircuitState::Open => {
                    if self.elapsed_since_failure() <= duration_millis(self.config.open_timeout) {
                        return None;
                    }
                    match self.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            tracing::info!(key = %self.key, "circuit breaker → half-open");
                            return Some(Admission::Probe);
                        }
                        // Lost the race; re-read whatever state the winner left behind.
                        Err(_) => continue,
                    }
                }
                CircuitState::HalfOpen => {
                    return self
                        .probe_in_flight
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                        .then_some(Admission::Probe);
                }
            }
        }
    }

    /// Record the terminal outcome of an allowed call.
    pub fn report(&self, success: bool) {
        match self.state() {
            CircuitState::Closed if success => {
                let _ = self.failures.fetch_update(Ordering::AcqRel, Ordering::Acquire, |f| {
                    Some(f.saturating_sub(1))
                });
            }
            CircuitState::Closed => {
                self.last_failure_millis.store(self.clock.now_millis(), Ordering::Release);
                let failures = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
                if failures >= self.config.failure_threshold {
                    self.probe_in_flight.store(true, Ordering::Release);
                    if self.transition(CircuitState::Closed, CircuitState::Open) {
                        tracing::error!(
                            key = %self.key,
                            failures,
                            threshold = self.config.failure_threshold,
                            "circuit breaker → open"
                        );
                    }
                }
            }
            CircuitState::HalfOpen if success => {
                if self.transition(CircuitState::HalfOpen, CircuitState::Closed) {
                    self.failures.store(0, Ordering::Release);
                    self.probe_in_flight.store(false, Ordering::Release);
                    tracing::info!(key = %self.key, "circuit breaker → closed");
                }
            }
            CircuitState::HalfOpen => {
                self.last_failure_millis.store(self.clock.now_millis(), Ordering::Release);
                let failures = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
                if self.transition(CircuitState::HalfOpen, CircuitState::Open) {
                    tracing::warn!(key = %self.key, failures, "circuit breaker probe failed → open");
                }
            }
            CircuitState::Open => {
                tracing::debug!(key = %self.key, success, "ignoring report while circuit is open");
            }
        }
    }

    /// Give back the probe slot of a call that ended without a report. Calls admitted while
    /// closed never held the slot, so releasing them is a no-op.
    pub fn release(&self, admission: Admission) {
        if admission == Admission::Probe && self.state() == CircuitState::HalfOpen {
            self.probe_in_flight.store(false, Ordering::Release);
        }
    }

    /// Back to Closed with a clean history.
    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
        self.last_failure_millis.store(NEVER, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);
        self.state.store(STATE_CLOSED, Ordering::Release);
    }

    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        self.state
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn elapsed_since_failure(&self) -> u64 {
        match self.last_failure_millis.load(Ordering::Acquire) {
            NEVER => u64::MAX,
            at => self.clock.now_millis().saturating_sub(at),
        }
    }
}

//! Exponential backoff with a configurable multiplier and cap.
//!
//! Attempt semantics: `delay(n)` is the pause scheduled after the `n`-th failed attempt, so the
//! pause before attempt 2 is `delay(1) == base`. `delay(0)` is zero (the initial call never waits).
//!
//! Inputs are clamped on construction: `base` to [`MAX_BASE_DELAY`] and `max` to
//! [`MAX_DELAY_CEILING`], so a misconfigured caller cannot park a task for hours.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use storeguard::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay(5), Duration::from_secs(1)); // capped
//! ```

use std::time::Duration;

/// Largest accepted base delay.
pub const MAX_BASE_DELAY: Duration = Duration::from_secs(30);
/// Largest accepted delay cap.
pub const MAX_DELAY_CEILING: Duration = Duration::from_secs(60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    #[error("backoff multiplier must be finite and >= 1.0 (got {0})")]
    InvalidMultiplier(f64),
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    /// Doubling backoff starting at `base`, capped at [`MAX_DELAY_CEILING`].
    pub fn exponential(base: Duration) -> Self {
        Self { base: base.min(MAX_BASE_DELAY), max: MAX_DELAY_CEILING, multiplier: 2.0 }
    }

    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        let delay = delay.min(MAX_BASE_DELAY);
        Self { base: delay, max: delay, multiplier: 1.0 }
    }

    /// Backoff from constants that already satisfy `max >= base` and `multiplier >= 1`.
    pub(crate) fn from_parts(base: Duration, max: Duration, multiplier: f64) -> Self {
        let base = base.min(MAX_BASE_DELAY);
        Self { base, max: max.clamp(base, MAX_DELAY_CEILING), multiplier: multiplier.max(1.0) }
    }

    /// Growth factor between consecutive delays.
    pub fn with_multiplier(mut self, multiplier: f64) -> Result<Self, BackoffError> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BackoffError::InvalidMultiplier(multiplier));
        }
        self.multiplier = multiplier;
        Ok(self)
    }

    /// Upper bound for any single delay; values above [`MAX_DELAY_CEILING`] are clamped.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        let max = max.min(MAX_DELAY_CEILING);
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = max;
        Ok(self)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Nominal (pre-jitter) delay after the given failed attempt.
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let max_nanos = self.max.as_nanos() as f64;
        let nanos = self.base.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= max_nanos {
            return self.max;
        }
        Duration::from_nanos(nanos.round() as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_each_time() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_backoff_respects_max() {
        let backoff = Backoff::exponential(Duration::from_millis(100))
            .with_max(Duration::from_secs(1))
            .unwrap();

        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_secs(1));
        assert_eq!(backoff.delay(50), Duration::from_secs(1));
    }

    #[test]
    fn fractional_multiplier() {
        let backoff = Backoff::exponential(Duration::from_millis(1000))
            .with_multiplier(1.5)
            .unwrap();
        assert_eq!(backoff.delay(2), Duration::from_millis(1500));
        assert_eq!(backoff.delay(3), Duration::from_millis(2250));
    }

    #[test]
    fn constant_backoff_never_grows() {
        let backoff = Backoff::constant(Duration::from_millis(250));
        assert_eq!(backoff.delay(1), Duration::from_millis(250));
        assert_eq!(backoff.delay(9), Duration::from_millis(250));
    }

    #[test]
    fn inputs_are_clamped() {
        let backoff = Backoff::exponential(Duration::from_secs(600));
        assert_eq!(backoff.base(), MAX_BASE_DELAY);

        let backoff = backoff.with_max(Duration::from_secs(3600)).unwrap();
        assert_eq!(backoff.max(), MAX_DELAY_CEILING);
    }

    #[test]
    fn huge_attempt_saturates_to_max() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        assert_eq!(backoff.delay(usize::MAX), MAX_DELAY_CEILING);
    }

    #[test]
    fn rejects_invalid_multiplier() {
        let err = Backoff::exponential(Duration::from_millis(10)).with_multiplier(0.5);
        assert!(matches!(err, Err(BackoffError::InvalidMultiplier(_))));
        let err = Backoff::exponential(Duration::from_millis(10)).with_multiplier(f64::NAN);
        assert!(matches!(err, Err(BackoffError::InvalidMultiplier(_))));
    }

    #[test]
    fn base_greater_than_max_is_rejected() {
        let err = Backoff::exponential(Duration::from_secs(10))
            .with_max(Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, BackoffError::MaxLessThanBase { .. }));
    }

    #[test]
    fn zero_base_behaves() {
        let backoff = Backoff::exponential(Duration::ZERO);
        assert_eq!(backoff.delay(3), Duration::ZERO);
    }
}

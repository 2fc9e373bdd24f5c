//! Jitter strategies to keep retrying callers from synchronizing.
//!
//! - `None`: deterministic delays, for tests or tightly controlled workflows.
//! - `Proportional(r)`: uniform in `[d·(1-r), d·(1+r)]`, floored at zero. The executor default is
//!   `r = 0.25`.
//!
//! RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//! `apply_with_rng`.

use rand::{rng, Rng};
use std::time::Duration;

/// Default spread for [`Jitter::proportional_default`].
pub const DEFAULT_JITTER_RATIO: f64 = 0.25;

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// Use the exact backoff delay
    None,
    /// Add or subtract up to `ratio × delay`
    Proportional(f64),
}

impl Default for Jitter {
    fn default() -> Self {
        Self::proportional_default()
    }
}

impl Jitter {
    /// `±ratio` spread; the ratio is clamped into `[0, 1]`, non-finite values disable jitter.
    pub fn proportional(ratio: f64) -> Self {
        if !ratio.is_finite() {
            return Jitter::None;
        }
        Jitter::Proportional(ratio.clamp(0.0, 1.0))
    }

    /// `±25%` spread.
    pub fn proportional_default() -> Self {
        Jitter::Proportional(DEFAULT_JITTER_RATIO)
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match *self {
            Jitter::None => delay,
            Jitter::Proportional(ratio) => {
                let nanos = delay.as_nanos() as f64;
                if nanos == 0.0 || ratio == 0.0 {
                    return delay;
                }
                let spread = nanos * ratio;
                let offset = rng.random_range(-spread..=spread);
                let jittered = (nanos + offset).max(0.0);
                Duration::from_nanos(jittered.min(u64::MAX as f64) as u64)
            }
        }
    }

    /// Inclusive bounds the jittered value can take for `delay`.
    pub fn bounds(&self, delay: Duration) -> (Duration, Duration) {
        match *self {
            Jitter::None => (delay, delay),
            Jitter::Proportional(ratio) => {
                let nanos = delay.as_nanos() as f64;
                let scale = |factor: f64| Duration::from_nanos((nanos * factor).round() as u64);
                (scale((1.0 - ratio).max(0.0)), scale(1.0 + ratio))
            }
        }
    }
}

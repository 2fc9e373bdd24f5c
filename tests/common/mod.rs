#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use storeguard::{InstantSleeper, ManualClock, Resilience, ResilienceConfig, TrackingSleeper};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestError {
    pub attempt: usize,
    pub transient: bool,
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "test failure on attempt {}", self.attempt)
    }
}

impl std::error::Error for TestError {}

/// Context driven by a manual clock, recording every backoff delay.
pub fn tracked_context() -> (Resilience, ManualClock, TrackingSleeper) {
    let clock = ManualClock::starting_at(1_700_000_000_000);
    let sleeper = TrackingSleeper::new();
    let resilience = Resilience::builder()
        .clock(clock.clone())
        .sleeper(sleeper.clone())
        .build()
        .expect("default config is valid");
    (resilience, clock, sleeper)
}

/// Context that never sleeps and does not spawn cache sweeps.
pub fn instant_context(clock: &ManualClock) -> Resilience {
    let config = ResilienceConfig { spawn_cache_cleanup: false, ..ResilienceConfig::default() };
    Resilience::builder()
        .config(config)
        .clock(clock.clone())
        .sleeper(InstantSleeper)
        .build()
        .expect("default config is valid")
}

/// Shared invocation counter for operations under test.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    /// Record an invocation, returning its 1-based number.
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

//! TTL Cleanup Task
//!
//! Background task that periodically sweeps expired entries. It holds only a weak reference, so
//! dropping the last `Arc` to the cache ends the task at its next tick.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache::BoundedCache;

/// Spawn the sweep loop on the current tokio runtime.
pub(crate) fn spawn_cleanup_task<V>(cache: Weak<BoundedCache<V>>, interval: Duration) -> JoinHandle<()>
where
    V: Send + 'static,
{
    tokio::spawn(async move {
        debug!(interval_ms = interval.as_millis() as u64, "starting cache cleanup task");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(cache) = cache.upgrade() else {
                debug!("cache dropped; stopping cleanup task");
                break;
            };
            if cache.is_destroyed() {
                break;
            }
            let removed = cache.cleanup_expired();
            if removed > 0 {
                info!(removed, "cache cleanup removed expired entries");
            } else {
                debug!("cache cleanup found no expired entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use crate::cache::{BoundedCache, CacheConfig};
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn cache(clock: &ManualClock) -> Arc<BoundedCache<&'static str>> {
        let config =
            CacheConfig::new(100, Duration::from_secs(300), Duration::from_secs(60)).unwrap();
        Arc::new(BoundedCache::with_clock(config, Arc::new(clock.clone())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_removes_expired_entries() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        cache.set("expire_soon", "v", Some(Duration::from_secs(1)));
        cache.set("long_lived", "v", None);
        assert!(cache.spawn_cleanup());
        assert!(!cache.spawn_cleanup(), "second spawn should be refused");

        clock.advance(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(cache.size(), 1);
        assert!(cache.has("long_lived"));
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_stops_the_task() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        cache.spawn_cleanup();
        cache.destroy();
        assert!(!cache.spawn_cleanup());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(cache.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ends_when_cache_is_dropped() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        let weak = Arc::downgrade(&cache);
        let handle = super::spawn_cleanup_task(weak, Duration::from_secs(1));
        drop(cache);
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(handle.is_finished());
    }
}

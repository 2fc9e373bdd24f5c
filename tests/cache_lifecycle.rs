mod common;

use std::sync::Arc;
use std::time::Duration;

use common::instant_context;
use storeguard::{
    CacheConfig, ManualClock, MemoryStorage, RegistryError, Resilience, ResilienceConfig, Storage,
};

fn small_config(max_size: usize) -> CacheConfig {
    CacheConfig::new(max_size, Duration::from_secs(300), Duration::from_secs(60)).unwrap()
}

#[tokio::test]
async fn values_round_trip_until_their_ttl_elapses() {
    let clock = ManualClock::starting_at(1_000_000);
    let resilience = instant_context(&clock);
    let cache = resilience.create_cache::<String>("products").unwrap();

    assert!(cache.set("sku-1", "blue mug".to_string(), Some(Duration::from_millis(1_000))));
    assert_eq!(cache.get("sku-1").as_deref(), Some("blue mug"));

    clock.advance(Duration::from_millis(1_000));
    assert!(cache.has("sku-1"), "an entry is live at exactly its expiry time");

    clock.advance(Duration::from_millis(1));
    assert_eq!(cache.get("sku-1"), None);
    assert_eq!(cache.size(), 0);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.expirations, 1);
}

#[tokio::test]
async fn overflow_evicts_least_accessed_down_to_seventy_percent() {
    let clock = ManualClock::starting_at(0);
    let resilience = instant_context(&clock);
    let cache = resilience.create_cache_with::<u32>("prices", small_config(10)).unwrap();

    for i in 0..10 {
        cache.set(format!("k{i}"), i, None);
    }
    for i in 5..10 {
        assert_eq!(cache.get(&format!("k{i}")), Some(i));
    }
    cache.set("k10", 10, None);

    assert_eq!(cache.size(), 7);
    assert_eq!(cache.stats().evictions, 4);
    for i in 0..4 {
        assert!(!cache.has(&format!("k{i}")), "k{i} should have been evicted");
    }
    for i in 4..11 {
        assert!(cache.has(&format!("k{i}")), "k{i} should have survived");
    }
}

#[tokio::test]
async fn delete_is_idempotent_and_clear_empties_the_cache() {
    let clock = ManualClock::starting_at(0);
    let resilience = instant_context(&clock);
    let cache = resilience.create_cache::<u32>("carts").unwrap();

    cache.set("a", 1, None);
    cache.set("b", 2, None);
    assert!(cache.delete("a"));
    assert!(!cache.delete("a"));
    assert_eq!(cache.size(), 1);

    cache.clear();
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.get("b"), None);
}

#[tokio::test]
async fn locked_keys_reject_writes_until_released() {
    let clock = ManualClock::starting_at(0);
    let resilience = instant_context(&clock);
    let cache = resilience.create_cache::<u32>("stock").unwrap();

    let lock = cache.try_lock("sku-9").unwrap();
    assert!(cache.is_locked("sku-9"));
    assert!(cache.try_lock("sku-9").is_none());
    assert!(!cache.set("sku-9", 1, None));

    assert!(lock.commit(12, None));
    assert!(!cache.is_locked("sku-9"));
    assert_eq!(cache.get("sku-9"), Some(12));
}

#[tokio::test]
async fn get_or_compute_caches_the_first_result() {
    let clock = ManualClock::starting_at(0);
    let resilience = instant_context(&clock);
    let cache = resilience.create_cache::<String>("collections").unwrap();

    let first = cache
        .get_or_compute("summer", None, || async { Ok::<_, std::io::Error>("fresh".to_string()) })
        .await
        .unwrap();
    let second = cache
        .get_or_compute("summer", None, || async {
            Err::<String, _>(std::io::Error::new(std::io::ErrorKind::Other, "must not be called"))
        })
        .await
        .unwrap();

    assert_eq!(first, "fresh");
    assert_eq!(second, "fresh");
}

#[tokio::test]
async fn shutdown_destroys_registered_caches() {
    let clock = ManualClock::starting_at(0);
    let resilience = instant_context(&clock);
    let products = resilience.create_cache::<u32>("products").unwrap();
    let orders = resilience.create_cache::<u32>("orders").unwrap();
    products.set("a", 1, None);
    assert_eq!(resilience.cache_names(), vec!["orders".to_string(), "products".to_string()]);
    assert!(matches!(
        resilience.create_cache::<u32>("orders"),
        Err(RegistryError::DuplicateCache(name)) if name == "orders"
    ));

    resilience.shutdown();
    resilience.shutdown();

    assert!(resilience.is_shut_down());
    assert!(products.is_destroyed() && orders.is_destroyed());
    assert_eq!(products.size(), 0);
    assert!(!products.set("b", 2, None));
    assert!(resilience.cache_names().is_empty());
    assert!(matches!(resilience.create_cache::<u32>("late"), Err(RegistryError::ShutDown)));
}

#[tokio::test]
async fn persistent_cache_survives_a_new_context() {
    let clock = ManualClock::starting_at(1_700_000_000_000);
    let storage = Arc::new(MemoryStorage::new());

    {
        let resilience = instant_context(&clock);
        let cache = resilience
            .create_persistent_cache::<Vec<u32>>("wishlist", storage.clone())
            .unwrap();
        cache.set("user-1", vec![3, 5, 8], None).unwrap();
        resilience.shutdown();
    }
    assert!(storage.keys().unwrap().iter().any(|k| k == "wishlist:user-1"));

    let resilience = instant_context(&clock);
    let cache = resilience.create_persistent_cache::<Vec<u32>>("wishlist", storage).unwrap();
    assert_eq!(cache.get("user-1"), Some(vec![3, 5, 8]));
}

#[tokio::test(start_paused = true)]
async fn background_sweep_removes_expired_entries() {
    let clock = ManualClock::starting_at(0);
    let config = ResilienceConfig { spawn_cache_cleanup: true, ..ResilienceConfig::default() };
    let resilience = Resilience::builder()
        .config(config)
        .clock(clock.clone())
        .sleeper(storeguard::InstantSleeper)
        .build()
        .unwrap();
    let cache = resilience.create_cache::<u32>("sessions").unwrap();

    cache.set("short", 1, Some(Duration::from_secs(1)));
    cache.set("long", 2, Some(Duration::from_secs(3_600)));
    clock.advance(Duration::from_secs(2));

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(cache.size(), 1);
    assert_eq!(cache.stats().expirations, 1);
    assert_eq!(cache.stats().misses, 0, "the sweep does not count as a read");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_respect_capacity() {
    let clock = ManualClock::starting_at(0);
    let resilience = instant_context(&clock);
    let cache = resilience.create_cache_with::<usize>("hot", small_config(50)).unwrap();

    let mut handles = Vec::new();
    for worker in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..200 {
                let key = format!("w{worker}-{}", i % 40);
                cache.set(key.clone(), i, None);
                let _ = cache.get(&key);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(cache.size() <= 50);
    let stats = cache.stats();
    assert_eq!(stats.max_size, 50);
    assert!(stats.hits + stats.misses == 8 * 200);
}

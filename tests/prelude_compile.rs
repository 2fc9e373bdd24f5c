//! Compile-time prelude coverage test.
use storeguard::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let _jitter = Jitter::None;
    let _state = CircuitState::Closed;
    let _kind = FailureKind::Timeout;
    let _cache = BoundedCache::<u8>::new(CacheConfig::default());
    let _breakers = CircuitBreakerConfig::default();

    let resilience = Resilience::builder().build().expect("default config is valid");
    let config = RetryProfile::Network.config::<std::io::Error>();
    let value = resilience
        .run(|| async { Ok::<_, std::io::Error>(Duration::from_millis(1)) }, &config, None)
        .await
        .expect("first attempt succeeds");
    assert_eq!(value, Duration::from_millis(1));

    let _: Option<&RetryConfig<std::io::Error>> = None;
    let _: Option<ResilienceError<HttpError<std::io::Error>>> = None;
    let _: Option<PersistentCache<u8>> = None;
    let _: Option<CacheStats> = None;
    let _: Option<RetryExecutor> = None;
    let _: Option<ResilientHttp> = None;
    let _ = <std::io::Error as Classify>::failure_kind;
}

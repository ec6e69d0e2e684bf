//! Integration tests for the Redis-backed cache store.
//!
//! Tests marked `#[ignore]` spin up a real Redis with testcontainers and
//! need Docker: `cargo test -p inkpress-cache -- --ignored`.

use std::time::Duration;

use inkpress_cache::{CacheSettings, CacheStore, LocalConfig, RedisConfig};
use serde_json::{Value, json};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

fn settings(url: String, prefix: &str) -> CacheSettings {
    CacheSettings {
        redis: RedisConfig {
            url: Some(url),
            pool_size: 5,
            timeout_ms: 5000,
            key_prefix: prefix.to_string(),
            ..Default::default()
        },
        local: LocalConfig::default(),
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_cache_connection() {
    let store = CacheStore::connect(&settings(get_redis_url().await, "conn:")).await;

    assert_eq!(store.provider(), "redis");
    store.close();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_cache_get_set() {
    let store = CacheStore::connect(&settings(get_redis_url().await, "getset:")).await;

    let value = json!({"success": true, "data": ["a", "b"]});
    assert!(store.set("redis_test_key", &value, 60).await);
    assert_eq!(store.get::<Value>("redis_test_key").await, Some(value));
    assert!(store.exists("redis_test_key").await);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_cache_shared_between_instances() {
    let url = get_redis_url().await;
    let first = CacheStore::connect(&settings(url.clone(), "shared:")).await;
    let second = CacheStore::connect(&settings(url, "shared:")).await;

    assert!(first.set("shared_key", &"from first", 60).await);
    assert_eq!(
        second.get::<String>("shared_key").await.as_deref(),
        Some("from first")
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_pattern_invalidation_scope() {
    let store = CacheStore::connect(&settings(get_redis_url().await, "scope:")).await;

    for key in ["content:1", "content:2", "public:1"] {
        assert!(store.set(key, &key, 60).await);
    }

    assert_eq!(store.invalidate_pattern("content:*").await, 2);
    assert!(!store.exists("content:1").await);
    assert!(!store.exists("content:2").await);
    assert!(store.exists("public:1").await);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_flush_with_prefix_keeps_other_prefixes() {
    let url = get_redis_url().await;
    let mine = CacheStore::connect(&settings(url.clone(), "mine:")).await;
    let theirs = CacheStore::connect(&settings(url, "theirs:")).await;

    assert!(mine.set("k", &1, 60).await);
    assert!(theirs.set("k", &2, 60).await);

    assert!(mine.flush().await);

    assert!(!mine.exists("k").await);
    assert_eq!(theirs.get::<u32>("k").await, Some(2));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_store_switches_to_redis_once_reachable() {
    // Own container: pausing the shared one would stall the other tests
    let container = Redis::default()
        .start()
        .await
        .expect("start redis container");
    let port = container.get_host_port_ipv4(6379).await.expect("get port");
    container.pause().await.expect("pause redis container");

    let mut config = settings(format!("redis://127.0.0.1:{port}"), "recover:");
    config.redis.timeout_ms = 500;
    config.redis.health_check_interval_secs = 1;

    let store = CacheStore::connect(&config).await;
    assert_eq!(store.provider(), "local");

    container.unpause().await.expect("unpause redis container");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while store.provider() != "redis" {
        assert!(
            tokio::time::Instant::now() < deadline,
            "store did not reconnect to redis"
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    assert!(store.set("after_recovery", &1, 60).await);
    assert_eq!(store.get::<i32>("after_recovery").await, Some(1));
    store.close();
}

#[tokio::test]
async fn test_graceful_degradation_invalid_url() {
    let config = CacheSettings {
        redis: RedisConfig {
            url: Some("redis://127.0.0.1:1".to_string()),
            pool_size: 5,
            timeout_ms: 1000,
            ..Default::default()
        },
        local: LocalConfig::default(),
    };

    // Should fall back to local cache
    let store = CacheStore::connect(&config).await;
    assert_eq!(store.provider(), "local");

    // But should still work as local cache
    assert!(store.set("fallback_key", &"fallback_value", 60).await);
    assert_eq!(
        store.get::<String>("fallback_key").await.as_deref(),
        Some("fallback_value")
    );

    let stats = store.stats().await;
    assert_eq!(stats.provider, "local");
    assert_eq!(stats.key_count, Some(1));
    store.close();
}

#[tokio::test]
async fn test_disabled_redis() {
    let store = CacheStore::connect(&CacheSettings::default()).await;

    assert_eq!(store.provider(), "local");
    assert_eq!(store.stats().await.provider, "local");
}

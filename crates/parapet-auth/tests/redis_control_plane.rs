//! Integration tests for the control plane against a real Redis.
//!
//! Everything here also runs against the memory tier in the unit tests;
//! these verify the Redis command mapping (INCR/TTL, sets, sorted
//! collections, SCAN) end to end. Tests share one container, so each
//! test uses its own principals and client identities.

use std::time::Duration;

use parapet_auth::{LoginAttemptGuard, RequestRateLimiter, SessionRegistry};
use parapet_core::{
    LockoutConfig, RateLimitConfig, SessionPolicy, SessionRecord, StoreConfig,
};
use parapet_store::{StoreBackend, create_store_backend};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use time::OffsetDateTime;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

fn init_tracing() {
    // Prefer RUST_LOG from env, otherwise default to info.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            init_tracing();

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

async fn redis_store() -> StoreBackend {
    let config = StoreConfig {
        enabled: true,
        url: get_redis_url().await,
        pool_size: 5,
        timeout_ms: 5000,
    };
    let store = create_store_backend(&config).await;
    assert!(
        store.is_redis_available().await,
        "expected a Redis-backed store"
    );
    store
}

fn record(username: &str, token: &str, policy: SessionPolicy) -> SessionRecord {
    let now = OffsetDateTime::now_utc();
    SessionRecord {
        username: username.to_string(),
        display_name: None,
        token: token.to_string(),
        issued_at: now,
        expires_at: now + time::Duration::minutes(30),
        client_ip: Some("198.51.100.4".to_string()),
        location: None,
        browser: Some("Firefox".to_string()),
        os: Some("Linux".to_string()),
        policy,
    }
}

#[tokio::test]
async fn test_lockout_threshold_and_unlock() {
    let guard = LoginAttemptGuard::new(
        redis_store().await,
        LockoutConfig {
            enabled: true,
            max_attempts: 3,
            lock_duration_minutes: 1,
        },
    );

    guard.record_failure("it-alice").await;
    guard.record_failure("it-alice").await;
    assert!(!guard.is_locked("it-alice").await);
    assert_eq!(guard.remaining_attempts("it-alice").await, Some(1));

    guard.record_failure("it-alice").await;
    assert!(guard.is_locked("it-alice").await);
    assert_eq!(guard.current_attempts("it-alice").await, 0);

    let remaining = guard.lock_remaining_seconds("it-alice").await;
    assert!((55..=60).contains(&remaining), "remaining = {remaining}");

    let err = guard.check_locked("it-alice").await.unwrap_err();
    assert!(err.is_locked());

    guard.unlock("it-alice").await.unwrap();
    assert!(!guard.is_locked("it-alice").await);
    guard.check_locked("it-alice").await.unwrap();
}

#[tokio::test]
async fn test_success_resets_counter() {
    let guard = LoginAttemptGuard::new(
        redis_store().await,
        LockoutConfig {
            enabled: true,
            max_attempts: 5,
            lock_duration_minutes: 30,
        },
    );

    guard.record_failure("it-bob").await;
    guard.record_failure("it-bob").await;
    assert_eq!(guard.remaining_attempts("it-bob").await, Some(3));

    guard.record_success("it-bob").await;
    assert_eq!(guard.remaining_attempts("it-bob").await, Some(5));
}

#[tokio::test]
async fn test_single_device_token_replacement() {
    let registry = SessionRegistry::new(redis_store().await, SessionPolicy::Single);
    let ttl = Duration::from_secs(60);

    registry
        .save(&record("it-carol", "it-c1", SessionPolicy::Single), ttl)
        .await
        .unwrap();
    registry
        .save(&record("it-carol", "it-c2", SessionPolicy::Single), ttl)
        .await
        .unwrap();

    assert!(registry.resolve_by_token("it-c1").await.is_none());
    let session = registry.resolve_by_token("it-c2").await.unwrap();
    assert_eq!(session.username, "it-carol");
    assert_eq!(registry.online_device_count("it-carol").await, 1);
}

#[tokio::test]
async fn test_multi_device_count_and_partial_logout() {
    let registry = SessionRegistry::new(redis_store().await, SessionPolicy::Multiple);
    let ttl = Duration::from_secs(60);

    registry
        .save(&record("it-dave", "it-d1", SessionPolicy::Multiple), ttl)
        .await
        .unwrap();
    registry
        .save(&record("it-dave", "it-d2", SessionPolicy::Multiple), ttl)
        .await
        .unwrap();
    assert_eq!(registry.online_device_count("it-dave").await, 2);

    registry.remove_by_token("it-d1").await.unwrap();
    assert_eq!(registry.online_device_count("it-dave").await, 1);
    assert!(registry.resolve_by_token("it-d1").await.is_none());
    assert!(registry.resolve_by_token("it-d2").await.is_some());

    registry.remove("it-dave").await.unwrap();
    assert!(!registry.is_online("it-dave").await);
}

#[tokio::test]
async fn test_multi_device_lazy_eviction() {
    let registry = SessionRegistry::new(redis_store().await, SessionPolicy::Multiple);

    registry
        .save(
            &record("it-erin", "it-e1", SessionPolicy::Multiple),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    registry
        .save(
            &record("it-erin", "it-e2", SessionPolicy::Multiple),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    assert_eq!(registry.online_device_count("it-erin").await, 2);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // e1's payload expired in Redis; enumeration prunes the set member.
    let sessions = registry.resolve_all_by_username("it-erin").await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].token, "it-e2");
    assert_eq!(registry.online_device_count("it-erin").await, 1);
}

#[tokio::test]
async fn test_rate_limit_window() {
    let limiter = RequestRateLimiter::new(redis_store().await, RateLimitConfig::default());
    let window = Duration::from_secs(1);

    for i in 0..5 {
        assert!(
            limiter
                .try_acquire("ip:203.0.113.77", "/login", 5, window)
                .await,
            "request {i} should be allowed"
        );
    }
    assert!(
        !limiter
            .try_acquire("ip:203.0.113.77", "/login", 5, window)
            .await
    );

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(
        limiter
            .try_acquire("ip:203.0.113.77", "/login", 5, window)
            .await
    );
}

#[tokio::test]
async fn test_list_all_online_scan() {
    let registry = SessionRegistry::new(redis_store().await, SessionPolicy::Multiple);
    let ttl = Duration::from_secs(60);

    registry
        .save(&record("it-frank", "it-f1", SessionPolicy::Multiple), ttl)
        .await
        .unwrap();
    registry
        .save(&record("it-grace", "it-g1", SessionPolicy::Multiple), ttl)
        .await
        .unwrap();

    let online = registry.list_all_online().await;
    let tokens: Vec<&str> = online.iter().map(|s| s.token.as_str()).collect();
    assert!(tokens.contains(&"it-f1"));
    assert!(tokens.contains(&"it-g1"));
}

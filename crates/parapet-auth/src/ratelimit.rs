//! Sliding-window request rate limiting per (client identity, path).
//!
//! Each pair gets a score-ordered collection at
//! `rate:limit:{clientId}:{path}` holding one member per request, scored
//! by its arrival time in milliseconds. Acquiring sweeps members older
//! than the window, checks the cardinality against the limit, then
//! records the request and refreshes the key TTL to `window + 1s`.
//!
//! The check-then-insert sequence is not atomic: under high concurrency
//! the effective rate can slightly exceed the limit. This is a
//! best-effort throttle, not a hard quota. A store error during the
//! check fails open so a cache outage does not become a full lockout.

use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use parapet_core::RateLimitConfig;
use parapet_store::{StoreBackend, StoreResult};

const RATE_LIMIT_KEY_PREFIX: &str = "rate:limit:";

fn rate_limit_key(client_id: &str, path: &str) -> String {
    format!("{RATE_LIMIT_KEY_PREFIX}{client_id}:{path}")
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Outcome of a rate-limit check, distinguishable by the binding layer
/// (throttled maps to 429, blacklisted to 403).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request may proceed.
    Allowed,
    /// The client exceeded the limit for this path within the window.
    Throttled,
    /// The client identity is on the black list.
    Blacklisted,
}

impl RateDecision {
    /// Returns `true` if the request may proceed.
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Resolve the client identity for rate limiting.
///
/// Prefers the authenticated user id (`user:{id}`); otherwise falls back
/// to the source address (`ip:{addr}`), taking the first hop of a
/// forwarded-for chain when present.
#[must_use]
pub fn resolve_client_id(
    user_id: Option<&str>,
    forwarded_for: Option<&str>,
    remote_addr: &str,
) -> String {
    if let Some(user_id) = user_id.filter(|id| !id.is_empty()) {
        return format!("user:{user_id}");
    }

    let ip = forwarded_for
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty() && !hop.eq_ignore_ascii_case("unknown"))
        .unwrap_or(remote_addr);
    format!("ip:{ip}")
}

/// Caps request throughput per (client identity, path) pair.
pub struct RequestRateLimiter {
    store: StoreBackend,
    config: RateLimitConfig,
}

impl RequestRateLimiter {
    /// Create a limiter over the given store and configuration.
    #[must_use]
    pub fn new(store: StoreBackend, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Full per-request check using the configured lists and limits:
    /// white-listed path prefixes bypass the limiter, black-listed client
    /// identities are denied before any store access, everything else
    /// goes through the sliding window.
    pub async fn check_request(&self, client_id: &str, path: &str) -> RateDecision {
        if self
            .config
            .white_list
            .iter()
            .any(|prefix| path.starts_with(prefix))
        {
            return RateDecision::Allowed;
        }

        if self.config.black_list.iter().any(|id| id == client_id) {
            tracing::warn!(client_id = %client_id, path = %path, "blacklisted client denied");
            return RateDecision::Blacklisted;
        }

        if !self.config.enabled {
            return RateDecision::Allowed;
        }

        let limit = self.config.limit_for(path);
        let window = Duration::from_secs(self.config.time_window_secs);
        if self.try_acquire(client_id, path, limit, window).await {
            RateDecision::Allowed
        } else {
            tracing::warn!(client_id = %client_id, path = %path, limit, "rate limit exceeded");
            RateDecision::Throttled
        }
    }

    /// Try to acquire a permit for one request. Returns `false` when the
    /// window already holds `limit` requests; the denied request is not
    /// recorded. Fails open on store errors.
    pub async fn try_acquire(
        &self,
        client_id: &str,
        path: &str,
        limit: u32,
        window: Duration,
    ) -> bool {
        match self.try_acquire_inner(client_id, path, limit, window).await {
            Ok(allowed) => allowed,
            Err(e) => {
                // Fail open: a throttle must not amplify a store outage.
                tracing::error!(
                    client_id = %client_id,
                    path = %path,
                    error = %e,
                    "rate limit check failed, allowing request"
                );
                true
            }
        }
    }

    async fn try_acquire_inner(
        &self,
        client_id: &str,
        path: &str,
        limit: u32,
        window: Duration,
    ) -> StoreResult<bool> {
        let key = rate_limit_key(client_id, path);
        let now = now_millis();
        let window_start = now - window.as_millis() as i64;

        // Sliding eviction of requests that left the window.
        self.store.zremrangebyscore(&key, window_start).await?;

        let current = self.store.zcard(&key).await?;
        if current >= u64::from(limit) {
            return Ok(false);
        }

        // Members carry a unique suffix so concurrent same-millisecond
        // requests are all counted.
        let member = format!("{now}:{}", Uuid::new_v4().simple());
        self.store.zadd(&key, &member, now).await?;
        self.store.expire(&key, window + Duration::from_secs(1)).await?;

        Ok(true)
    }

    /// Requests currently inside the window for the pair. Zero on store
    /// errors.
    pub async fn current_count(&self, client_id: &str, path: &str, window: Duration) -> u64 {
        let key = rate_limit_key(client_id, path);
        let window_start = now_millis() - window.as_millis() as i64;

        let count = async {
            self.store.zremrangebyscore(&key, window_start).await?;
            self.store.zcard(&key).await
        }
        .await;

        match count {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to read rate limit count");
                0
            }
        }
    }

    /// Drop all recorded requests for the pair.
    pub async fn clear(&self, client_id: &str, path: &str) -> StoreResult<()> {
        self.store.del(&rate_limit_key(client_id, path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn limiter(config: RateLimitConfig) -> RequestRateLimiter {
        RequestRateLimiter::new(StoreBackend::new_memory(), config)
    }

    fn default_limiter() -> RequestRateLimiter {
        limiter(RateLimitConfig::default())
    }

    /// A Redis-tier store whose pool can never hand out a connection.
    fn unreachable_store() -> StoreBackend {
        let pool = deadpool_redis::Config::from_url("redis://127.0.0.1:1")
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .unwrap();
        StoreBackend::new_redis(pool)
    }

    #[tokio::test]
    async fn test_denies_at_limit_within_window() {
        let limiter = default_limiter();
        let window = Duration::from_secs(1);

        for i in 0..5 {
            assert!(
                limiter.try_acquire("ip:1.2.3.4", "/login", 5, window).await,
                "request {i} should be allowed"
            );
        }
        assert!(!limiter.try_acquire("ip:1.2.3.4", "/login", 5, window).await);

        // The denied request was not recorded.
        assert_eq!(limiter.current_count("ip:1.2.3.4", "/login", window).await, 5);
    }

    #[tokio::test]
    async fn test_window_elapses_and_allows_again() {
        let limiter = default_limiter();
        let window = Duration::from_millis(200);

        for _ in 0..3 {
            assert!(limiter.try_acquire("ip:1.2.3.4", "/posts", 3, window).await);
        }
        assert!(!limiter.try_acquire("ip:1.2.3.4", "/posts", 3, window).await);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(limiter.try_acquire("ip:1.2.3.4", "/posts", 3, window).await);
    }

    #[tokio::test]
    async fn test_pairs_are_independent() {
        let limiter = default_limiter();
        let window = Duration::from_secs(1);

        for _ in 0..2 {
            assert!(limiter.try_acquire("ip:1.2.3.4", "/a", 2, window).await);
        }
        assert!(!limiter.try_acquire("ip:1.2.3.4", "/a", 2, window).await);

        // Different path and different client both unaffected.
        assert!(limiter.try_acquire("ip:1.2.3.4", "/b", 2, window).await);
        assert!(limiter.try_acquire("ip:5.6.7.8", "/a", 2, window).await);
    }

    #[tokio::test]
    async fn test_check_request_honors_path_override() {
        let limiter = limiter(RateLimitConfig {
            default_limit: 100,
            path_limits: HashMap::from([("/login".to_string(), 2)]),
            ..RateLimitConfig::default()
        });

        for _ in 0..2 {
            assert_eq!(
                limiter.check_request("ip:1.2.3.4", "/login").await,
                RateDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_request("ip:1.2.3.4", "/login").await,
            RateDecision::Throttled
        );
    }

    #[tokio::test]
    async fn test_white_list_bypasses_limiter() {
        let limiter = limiter(RateLimitConfig {
            default_limit: 1,
            white_list: vec!["/health".to_string()],
            ..RateLimitConfig::default()
        });

        for _ in 0..10 {
            assert_eq!(
                limiter.check_request("ip:1.2.3.4", "/health/live").await,
                RateDecision::Allowed
            );
        }
    }

    #[tokio::test]
    async fn test_black_list_short_circuits() {
        let limiter = limiter(RateLimitConfig {
            black_list: vec!["ip:192.0.2.1".to_string()],
            ..RateLimitConfig::default()
        });

        assert_eq!(
            limiter.check_request("ip:192.0.2.1", "/posts").await,
            RateDecision::Blacklisted
        );
        assert_eq!(
            limiter.check_request("ip:192.0.2.2", "/posts").await,
            RateDecision::Allowed
        );
    }

    #[tokio::test]
    async fn test_disabled_limiter_allows_everything() {
        let limiter = limiter(RateLimitConfig {
            enabled: false,
            default_limit: 1,
            ..RateLimitConfig::default()
        });

        for _ in 0..10 {
            assert!(limiter.check_request("ip:1.2.3.4", "/posts").await.is_allowed());
        }
    }

    #[tokio::test]
    async fn test_fails_open_on_wrong_value_kind() {
        let limiter = default_limiter();
        let window = Duration::from_secs(1);

        // A plain set under the window key makes the cardinality read fail.
        limiter
            .store
            .sadd(&rate_limit_key("ip:1.2.3.4", "/login"), "junk")
            .await
            .unwrap();

        // Zero limit: only the fail-open path can let this through.
        assert!(limiter.try_acquire("ip:1.2.3.4", "/login", 0, window).await);
        assert_eq!(limiter.current_count("ip:1.2.3.4", "/login", window).await, 0);
    }

    #[tokio::test]
    async fn test_check_request_allows_when_store_unreachable() {
        let limiter = RequestRateLimiter::new(
            unreachable_store(),
            RateLimitConfig {
                default_limit: 0,
                ..RateLimitConfig::default()
            },
        );

        assert_eq!(
            limiter.check_request("ip:1.2.3.4", "/posts").await,
            RateDecision::Allowed
        );
    }

    #[tokio::test]
    async fn test_clear_resets_the_window() {
        let limiter = default_limiter();
        let window = Duration::from_secs(1);

        for _ in 0..2 {
            assert!(limiter.try_acquire("ip:1.2.3.4", "/a", 2, window).await);
        }
        limiter.clear("ip:1.2.3.4", "/a").await.unwrap();
        assert!(limiter.try_acquire("ip:1.2.3.4", "/a", 2, window).await);
    }

    #[test]
    fn test_resolve_client_id_prefers_user() {
        assert_eq!(
            resolve_client_id(Some("42"), Some("203.0.113.9"), "10.0.0.1"),
            "user:42"
        );
        assert_eq!(resolve_client_id(Some(""), None, "10.0.0.1"), "ip:10.0.0.1");
    }

    #[test]
    fn test_resolve_client_id_first_forwarded_hop() {
        assert_eq!(
            resolve_client_id(None, Some("203.0.113.9, 10.0.0.2, 10.0.0.3"), "10.0.0.1"),
            "ip:203.0.113.9"
        );
        assert_eq!(
            resolve_client_id(None, Some(" 203.0.113.9 "), "10.0.0.1"),
            "ip:203.0.113.9"
        );
        assert_eq!(
            resolve_client_id(None, Some("unknown"), "10.0.0.1"),
            "ip:10.0.0.1"
        );
        assert_eq!(resolve_client_id(None, None, "10.0.0.1"), "ip:10.0.0.1");
    }
}

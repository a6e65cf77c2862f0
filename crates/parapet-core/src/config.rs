//! Configuration surface for the control plane.
//!
//! Every option recognized by the three components lives here, with serde
//! defaults so a partial (or empty) configuration file yields the documented
//! behavior: lockout after 5 failures for 30 minutes, multi-device sessions,
//! 100 requests per second per client and path.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::SessionPolicy;

/// Aggregated control-plane configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Login attempt / lockout settings.
    #[serde(default)]
    pub lockout: LockoutConfig,

    /// Session registry settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Request rate limiter settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Shared store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Login attempt guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Enable failed-login tracking and lockout.
    #[serde(default = "default_lockout_enabled")]
    pub enabled: bool,

    /// Consecutive failures before the account locks.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Lockout duration in minutes. Also the lifetime of the failure
    /// counter, set once on the first failure.
    #[serde(default = "default_lock_duration_minutes")]
    pub lock_duration_minutes: u64,
}

impl LockoutConfig {
    /// Lockout duration as a [`Duration`].
    #[must_use]
    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration_minutes * 60)
    }
}

fn default_lockout_enabled() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_lock_duration_minutes() -> u64 {
    30
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            enabled: default_lockout_enabled(),
            max_attempts: default_max_attempts(),
            lock_duration_minutes: default_lock_duration_minutes(),
        }
    }
}

/// Session registry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Device policy, fixed at startup.
    #[serde(default)]
    pub policy: SessionPolicy,
}

/// Request rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable the limiter. When disabled every request is allowed.
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,

    /// Default per-window request limit for paths without an override.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Sliding window length in seconds.
    #[serde(default = "default_time_window_secs")]
    pub time_window_secs: u64,

    /// Per-path limit overrides (exact path match).
    #[serde(default)]
    pub path_limits: HashMap<String, u32>,

    /// Path prefixes that bypass the limiter entirely.
    #[serde(default)]
    pub white_list: Vec<String>,

    /// Client identities that are always denied.
    #[serde(default)]
    pub black_list: Vec<String>,
}

impl RateLimitConfig {
    /// The limit applied to `path`, honoring per-path overrides.
    #[must_use]
    pub fn limit_for(&self, path: &str) -> u32 {
        self.path_limits.get(path).copied().unwrap_or(self.default_limit)
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_limit() -> u32 {
    100
}

fn default_time_window_secs() -> u64 {
    1
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            default_limit: default_limit(),
            time_window_secs: default_time_window_secs(),
            path_limits: HashMap::new(),
            white_list: Vec::new(),
            black_list: Vec::new(),
        }
    }
}

/// Shared store configuration.
///
/// With `enabled = false` (or an unreachable server) the control plane
/// runs on the in-memory tier, which is only suitable for a single
/// instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Use Redis. Gracefully degrades to the in-memory tier without it.
    #[serde(default = "default_store_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379").
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_store_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_store_enabled() -> bool {
    false
}

fn default_store_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_store_pool_size() -> usize {
    10
}

fn default_store_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: default_store_enabled(),
            url: default_store_url(),
            pool_size: default_store_pool_size(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

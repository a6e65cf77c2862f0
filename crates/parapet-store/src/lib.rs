//! Shared-store facade for the Parapet control plane.
//!
//! ## Tiers
//!
//! - **Memory (DashMap)**: in-process, single-instance deployments and tests
//! - **Redis (deadpool)**: shared across instances; the store, not the
//!   process, is the source of truth
//!
//! ## Graceful degradation
//!
//! If Redis is disabled or unreachable at startup, [`create_store_backend`]
//! falls back to the memory tier with a logged warning. The control plane
//! keeps working, but lockout counters and sessions are per-instance and
//! lost on restart — an attacker's attempt counter resetting is the
//! accepted worst case.

pub mod backend;

pub use backend::{StoreBackend, StoreError, StoreResult};

use parapet_core::StoreConfig;

/// Create a store backend based on configuration.
///
/// With `enabled = false` this returns the memory tier immediately.
/// Otherwise it builds a deadpool-redis pool, probes one connection, and
/// falls back to the memory tier if the pool cannot be created or the
/// probe fails.
pub async fn create_store_backend(config: &StoreConfig) -> StoreBackend {
    use std::time::Duration;

    if !config.enabled {
        tracing::info!("Redis disabled, using in-memory store");
        return StoreBackend::new_memory();
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(Duration::from_millis(config.timeout_ms));
    pool_config.timeouts.create = Some(Duration::from_millis(config.timeout_ms));
    pool_config.timeouts.recycle = Some(Duration::from_millis(config.timeout_ms));
    redis_config.pool = Some(pool_config);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to in-memory store."
            );
            return StoreBackend::new_memory();
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            StoreBackend::new_redis(pool)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-memory store."
            );
            StoreBackend::new_memory()
        }
    }
}

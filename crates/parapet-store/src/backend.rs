//! Store backend with Memory (DashMap) and Redis (deadpool) tiers.
//!
//! Every control-plane component talks to the store exclusively through
//! [`StoreBackend`]. The operation set is the intersection the components
//! need: atomic increment, per-key TTL, plain values, sets, and a
//! score-ordered collection for sliding-window queries.
//!
//! The Memory tier implements Redis-equivalent semantics (numeric-string
//! INCR, lazy expiry on access) so the same component code runs unchanged
//! against either tier. It is per-process state and therefore only correct
//! for a single service instance; multi-instance deployments need Redis.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;

/// Errors from the store facade.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Could not check a connection out of the pool.
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// A Redis command failed.
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    /// A command was applied to a value of the wrong kind, or the value
    /// could not be interpreted (mirrors Redis WRONGTYPE / parse errors).
    #[error("command error: {0}")]
    Command(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for parapet_core::AuthError {
    fn from(err: StoreError) -> Self {
        parapet_core::AuthError::store(err.to_string())
    }
}

#[derive(Debug, Clone)]
enum MemoryValue {
    Text(String),
    Set(HashSet<String>),
    /// (score, member), ordered by score then member.
    Sorted(BTreeSet<(i64, String)>),
}

impl MemoryValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "string",
            Self::Set(_) => "set",
            Self::Sorted(_) => "zset",
        }
    }
}

/// A memory-tier entry with optional expiry.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    value: MemoryValue,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: MemoryValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    /// Check if this entry has expired.
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

fn wrong_type(expected: &str, found: &str) -> StoreError {
    StoreError::Command(format!(
        "operation against a key holding the wrong kind of value (expected {expected}, found {found})"
    ))
}

/// Shared expiring key-value store.
///
/// ## Tiers
///
/// - **Memory**: single-instance mode, DashMap with lazy TTL eviction
/// - **Redis**: multi-instance mode, all state lives in Redis
///
/// Individual operations are atomic within a tier; multi-step sequences
/// built on top of them are not, and callers document their own
/// interleaving contracts.
#[derive(Clone)]
pub enum StoreBackend {
    /// Single-instance: process-local DashMap.
    Memory(Arc<DashMap<String, MemoryEntry>>),

    /// Multi-instance: Redis connection pool.
    Redis {
        /// Deadpool-managed connection pool.
        pool: Pool,
    },
}

impl StoreBackend {
    /// Create a new memory-tier backend.
    #[must_use]
    pub fn new_memory() -> Self {
        StoreBackend::Memory(Arc::new(DashMap::new()))
    }

    /// Create a new Redis-tier backend.
    #[must_use]
    pub fn new_redis(pool: Pool) -> Self {
        StoreBackend::Redis { pool }
    }

    /// Returns `true` when backed by Redis (for health checks).
    pub async fn is_redis_available(&self) -> bool {
        match self {
            StoreBackend::Memory(_) => false,
            StoreBackend::Redis { pool } => pool.get().await.is_ok(),
        }
    }

    /// Atomically increment the integer value at `key`, creating it at 0
    /// first if absent. Returns the incremented value.
    pub async fn incr(&self, key: &str) -> StoreResult<i64> {
        match self {
            StoreBackend::Memory(map) => {
                let mut entry = map
                    .entry(key.to_string())
                    .and_modify(|e| {
                        if e.is_expired() {
                            *e = MemoryEntry::new(MemoryValue::Text("0".to_string()), None);
                        }
                    })
                    .or_insert_with(|| MemoryEntry::new(MemoryValue::Text("0".to_string()), None));
                match &mut entry.value {
                    MemoryValue::Text(text) => {
                        let current: i64 = text.parse().map_err(|_| {
                            StoreError::Command("value is not an integer".to_string())
                        })?;
                        let next = current + 1;
                        *text = next.to_string();
                        Ok(next)
                    }
                    other => Err(wrong_type("string", other.kind())),
                }
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                Ok(conn.incr(key, 1i64).await?)
            }
        }
    }

    /// Set the TTL of an existing key. Returns `false` if the key is absent.
    pub async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        match self {
            StoreBackend::Memory(map) => match map.get_mut(key) {
                Some(mut entry) if !entry.is_expired() => {
                    entry.expires_at = Some(Instant::now() + ttl);
                    Ok(true)
                }
                _ => Ok(false),
            },
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                let set: bool = conn.expire(key, ttl.as_secs() as i64).await?;
                Ok(set)
            }
        }
    }

    /// Remaining TTL of `key`. `None` when the key is absent or has no
    /// expiry.
    pub async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        match self {
            StoreBackend::Memory(map) => match map.get(key) {
                Some(entry) if !entry.is_expired() => Ok(entry.remaining()),
                _ => Ok(None),
            },
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                let secs: i64 = conn.ttl(key).await?;
                // -2 = missing, -1 = no expiry
                if secs < 0 {
                    Ok(None)
                } else {
                    Ok(Some(Duration::from_secs(secs as u64)))
                }
            }
        }
    }

    /// Get the string value at `key`.
    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self {
            StoreBackend::Memory(map) => {
                if let Some(entry) = map.get(key) {
                    if entry.is_expired() {
                        drop(entry);
                        map.remove(key);
                        return Ok(None);
                    }
                    return match &entry.value {
                        MemoryValue::Text(text) => Ok(Some(text.clone())),
                        other => Err(wrong_type("string", other.kind())),
                    };
                }
                Ok(None)
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                Ok(conn.get::<_, Option<String>>(key).await?)
            }
        }
    }

    /// Set `key` to `value` with a TTL.
    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        match self {
            StoreBackend::Memory(map) => {
                map.insert(
                    key.to_string(),
                    MemoryEntry::new(MemoryValue::Text(value.to_string()), Some(ttl)),
                );
                Ok(())
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
                Ok(())
            }
        }
    }

    /// Delete `key`.
    pub async fn del(&self, key: &str) -> StoreResult<()> {
        match self {
            StoreBackend::Memory(map) => {
                map.remove(key);
                Ok(())
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                conn.del::<_, ()>(key).await?;
                Ok(())
            }
        }
    }

    /// Returns `true` if `key` exists.
    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self {
            StoreBackend::Memory(map) => {
                if let Some(entry) = map.get(key) {
                    if !entry.is_expired() {
                        return Ok(true);
                    }
                    drop(entry);
                    map.remove(key);
                }
                Ok(false)
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                Ok(conn.exists(key).await?)
            }
        }
    }

    /// Add `member` to the set at `key`, creating the set if absent.
    pub async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        match self {
            StoreBackend::Memory(map) => {
                let mut entry = map
                    .entry(key.to_string())
                    .and_modify(|e| {
                        if e.is_expired() {
                            *e = MemoryEntry::new(MemoryValue::Set(HashSet::new()), None);
                        }
                    })
                    .or_insert_with(|| MemoryEntry::new(MemoryValue::Set(HashSet::new()), None));
                match &mut entry.value {
                    MemoryValue::Set(set) => {
                        set.insert(member.to_string());
                        Ok(())
                    }
                    other => Err(wrong_type("set", other.kind())),
                }
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                conn.sadd::<_, _, ()>(key, member).await?;
                Ok(())
            }
        }
    }

    /// Remove `member` from the set at `key`.
    pub async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        match self {
            StoreBackend::Memory(map) => {
                if let Some(mut entry) = map.get_mut(key) {
                    if let MemoryValue::Set(set) = &mut entry.value {
                        set.remove(member);
                    }
                }
                Ok(())
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                conn.srem::<_, _, ()>(key, member).await?;
                Ok(())
            }
        }
    }

    /// All members of the set at `key`. Empty when absent.
    pub async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        match self {
            StoreBackend::Memory(map) => {
                if let Some(entry) = map.get(key) {
                    if entry.is_expired() {
                        drop(entry);
                        map.remove(key);
                        return Ok(Vec::new());
                    }
                    return match &entry.value {
                        MemoryValue::Set(set) => Ok(set.iter().cloned().collect()),
                        other => Err(wrong_type("set", other.kind())),
                    };
                }
                Ok(Vec::new())
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                Ok(conn.smembers::<_, Vec<String>>(key).await?)
            }
        }
    }

    /// Add `member` with `score` to the sorted collection at `key`.
    pub async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        match self {
            StoreBackend::Memory(map) => {
                let mut entry = map
                    .entry(key.to_string())
                    .and_modify(|e| {
                        if e.is_expired() {
                            *e = MemoryEntry::new(MemoryValue::Sorted(BTreeSet::new()), None);
                        }
                    })
                    .or_insert_with(|| {
                        MemoryEntry::new(MemoryValue::Sorted(BTreeSet::new()), None)
                    });
                match &mut entry.value {
                    MemoryValue::Sorted(sorted) => {
                        // Re-adding a member updates its score.
                        sorted.retain(|(_, m)| m.as_str() != member);
                        sorted.insert((score, member.to_string()));
                        Ok(())
                    }
                    other => Err(wrong_type("zset", other.kind())),
                }
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                conn.zadd::<_, _, _, ()>(key, member, score).await?;
                Ok(())
            }
        }
    }

    /// Remove every member of the sorted collection at `key` with a score
    /// in `[0, max]`.
    pub async fn zremrangebyscore(&self, key: &str, max: i64) -> StoreResult<()> {
        match self {
            StoreBackend::Memory(map) => {
                if let Some(mut entry) = map.get_mut(key) {
                    if let MemoryValue::Sorted(sorted) = &mut entry.value {
                        sorted.retain(|(score, _)| *score > max);
                    }
                }
                Ok(())
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                conn.zrembyscore::<_, _, _, ()>(key, 0i64, max).await?;
                Ok(())
            }
        }
    }

    /// Cardinality of the sorted collection at `key`. Zero when absent.
    pub async fn zcard(&self, key: &str) -> StoreResult<u64> {
        match self {
            StoreBackend::Memory(map) => {
                if let Some(entry) = map.get(key) {
                    if entry.is_expired() {
                        drop(entry);
                        map.remove(key);
                        return Ok(0);
                    }
                    return match &entry.value {
                        MemoryValue::Sorted(sorted) => Ok(sorted.len() as u64),
                        other => Err(wrong_type("zset", other.kind())),
                    };
                }
                Ok(0)
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                Ok(conn.zcard::<_, u64>(key).await?)
            }
        }
    }

    /// Every live key starting with `prefix`.
    ///
    /// Uses SCAN on the Redis tier; cost is proportional to the total key
    /// count. Intended for admin queries, not the request hot path.
    pub async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        match self {
            StoreBackend::Memory(map) => {
                let mut keys = Vec::new();
                let mut stale = Vec::new();
                for entry in map.iter() {
                    if !entry.key().starts_with(prefix) {
                        continue;
                    }
                    if entry.value().is_expired() {
                        stale.push(entry.key().clone());
                    } else {
                        keys.push(entry.key().clone());
                    }
                }
                for key in stale {
                    map.remove(&key);
                }
                Ok(keys)
            }
            StoreBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                let pattern = format!("{prefix}*");
                let mut keys = Vec::new();
                let mut iter: redis::AsyncIter<'_, String> = conn.scan_match(pattern).await?;
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
                Ok(keys)
            }
        }
    }
}

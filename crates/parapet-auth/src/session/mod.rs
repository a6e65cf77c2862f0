//! Session registry: authoritative record of valid tokens per principal.
//!
//! The device policy is chosen once at construction and selects one of two
//! key layouts in the shared store:
//!
//! | entry | single-device | multi-device |
//! |-------|---------------|--------------|
//! | session payload | `user:session:{username}` | `user:session:{token}` |
//! | token index | `user:token:{token}` → username | same |
//! | device set | — | `user:tokens:{username}` → set of tokens |
//!
//! Under the multi-device policy the device set is an *upper bound* on
//! active sessions: a token can outlive its session payload in the set
//! until a reader lazily evicts it.
//!
//! Mutating operations return `Result` so the caller sees registration
//! failures; resolution and queries are fail-safe — store errors are
//! logged and read as "no session", and a missing counterpart key
//! (token index without payload or vice versa) is treated as invalid
//! and evicted.

mod multi;
mod single;

use std::time::Duration;

use parapet_core::{AuthResult, SessionPolicy, SessionRecord};
use parapet_store::{StoreBackend, StoreResult};

pub(crate) const SESSION_KEY_PREFIX: &str = "user:session:";
pub(crate) const TOKEN_KEY_PREFIX: &str = "user:token:";
pub(crate) const DEVICE_SET_KEY_PREFIX: &str = "user:tokens:";

pub(crate) fn session_key(id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{id}")
}

pub(crate) fn token_key(token: &str) -> String {
    format!("{TOKEN_KEY_PREFIX}{token}")
}

pub(crate) fn device_set_key(username: &str) -> String {
    format!("{DEVICE_SET_KEY_PREFIX}{username}")
}

/// Read and deserialize a session payload. A payload that fails to parse
/// is deleted and reported as absent.
pub(crate) async fn read_record(
    store: &StoreBackend,
    key: &str,
) -> StoreResult<Option<SessionRecord>> {
    let Some(json) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&json) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "deleting malformed session payload");
            store.del(key).await?;
            Ok(None)
        }
    }
}

/// Session registry, dispatching on the policy fixed at construction.
#[derive(Clone)]
pub enum SessionRegistry {
    /// One active session per principal; a new login revokes the old token.
    SingleDevice(single::SingleDeviceRegistry),
    /// Concurrent sessions tracked through a per-principal token set.
    MultiDevice(multi::MultiDeviceRegistry),
}

impl SessionRegistry {
    /// Create a registry for the given policy.
    #[must_use]
    pub fn new(store: StoreBackend, policy: SessionPolicy) -> Self {
        match policy {
            SessionPolicy::Single => {
                Self::SingleDevice(single::SingleDeviceRegistry::new(store))
            }
            SessionPolicy::Multiple => {
                Self::MultiDevice(multi::MultiDeviceRegistry::new(store))
            }
        }
    }

    /// The policy this registry was constructed with.
    #[must_use]
    pub fn policy(&self) -> SessionPolicy {
        match self {
            Self::SingleDevice(_) => SessionPolicy::Single,
            Self::MultiDevice(_) => SessionPolicy::Multiple,
        }
    }

    fn store(&self) -> &StoreBackend {
        match self {
            Self::SingleDevice(registry) => registry.store(),
            Self::MultiDevice(registry) => registry.store(),
        }
    }

    /// Register a new session with the given TTL.
    ///
    /// Single-device: reads the current session, revokes the old token's
    /// index entry if it differs, then writes the new payload and index.
    /// The three steps are **not atomic**: two concurrent logins for the
    /// same principal can interleave and leave both tokens briefly
    /// indexable. This is the accepted "single active session, best
    /// effort" contract; closing the race would need a cross-key
    /// transaction the store does not promise.
    ///
    /// Multi-device: writes payload and index keyed by token, adds the
    /// token to the principal's device set and refreshes the set's TTL.
    pub async fn save(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<()> {
        match self {
            Self::SingleDevice(registry) => registry.save(record, ttl).await,
            Self::MultiDevice(registry) => registry.save(record, ttl).await,
        }
    }

    /// The principal's current session, if any. Multi-device returns the
    /// first resolvable device session (not necessarily the most recent)
    /// and lazily evicts stale device-set members.
    pub async fn resolve_by_username(&self, username: &str) -> Option<SessionRecord> {
        let result = match self {
            Self::SingleDevice(registry) => registry.resolve_by_username(username).await,
            Self::MultiDevice(registry) => registry.resolve_by_username(username).await,
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(username = %username, error = %e, "session lookup failed");
            None
        })
    }

    /// The session owning `token`, if any.
    pub async fn resolve_by_token(&self, token: &str) -> Option<SessionRecord> {
        let result = match self {
            Self::SingleDevice(registry) => registry.resolve_by_token(token).await,
            Self::MultiDevice(registry) => registry.resolve_by_token(token).await,
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "session lookup by token failed");
            None
        })
    }

    /// Every resolvable session for the principal (0 or 1 under the
    /// single-device policy). Stale device-set members are pruned.
    pub async fn resolve_all_by_username(&self, username: &str) -> Vec<SessionRecord> {
        let result = match self {
            Self::SingleDevice(registry) => registry.resolve_all_by_username(username).await,
            Self::MultiDevice(registry) => registry.resolve_all_by_username(username).await,
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(username = %username, error = %e, "session enumeration failed");
            Vec::new()
        })
    }

    /// Remove every session of the principal (logout).
    pub async fn remove(&self, username: &str) -> AuthResult<()> {
        match self {
            Self::SingleDevice(registry) => registry.remove(username).await,
            Self::MultiDevice(registry) => registry.remove(username).await,
        }
    }

    /// Remove the session owning `token`. Single-device delegates to
    /// [`remove`](Self::remove); multi-device deletes only that device's
    /// session, leaving siblings intact.
    pub async fn remove_by_token(&self, token: &str) -> AuthResult<()> {
        match self {
            Self::SingleDevice(registry) => registry.remove_by_token(token).await,
            Self::MultiDevice(registry) => registry.remove_by_token(token).await,
        }
    }

    /// Extend the expiry of the principal's sessions. Multi-device
    /// refreshes every device session plus the device set itself, an
    /// O(device-count) operation.
    pub async fn extend_expiry(&self, username: &str, ttl: Duration) -> AuthResult<()> {
        match self {
            Self::SingleDevice(registry) => registry.extend_expiry(username, ttl).await,
            Self::MultiDevice(registry) => registry.extend_expiry(username, ttl).await,
        }
    }

    /// Extend the expiry of one device's session, addressed by token.
    pub async fn extend_expiry_by_token(&self, token: &str, ttl: Duration) -> AuthResult<()> {
        match self {
            Self::SingleDevice(registry) => registry.extend_expiry_by_token(token, ttl).await,
            Self::MultiDevice(registry) => registry.extend_expiry_by_token(token, ttl).await,
        }
    }

    /// Whether the principal has at least one live session. Multi-device
    /// answers from device-set membership, which is an upper bound.
    pub async fn is_online(&self, username: &str) -> bool {
        let result = match self {
            Self::SingleDevice(registry) => registry.is_online(username).await,
            Self::MultiDevice(registry) => registry.is_online(username).await,
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(username = %username, error = %e, "online check failed");
            false
        })
    }

    /// Number of sessions currently tracked for the principal.
    pub async fn online_device_count(&self, username: &str) -> usize {
        let result = match self {
            Self::SingleDevice(registry) => registry.online_device_count(username).await,
            Self::MultiDevice(registry) => registry.online_device_count(username).await,
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(username = %username, error = %e, "device count failed");
            0
        })
    }

    /// Every live session in the store.
    ///
    /// Scans all session keys; cost is proportional to the total session
    /// count. Meant for admin dashboards, not the request hot path.
    pub async fn list_all_online(&self) -> Vec<SessionRecord> {
        let store = self.store();
        let keys = match store.scan_prefix(SESSION_KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "session scan failed");
                return Vec::new();
            }
        };

        let mut sessions = Vec::with_capacity(keys.len());
        for key in keys {
            match read_record(store, &key).await {
                Ok(Some(record)) => sessions.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to read session payload");
                }
            }
        }
        sessions
    }

    /// Administrative forced logout; same effect as [`remove`](Self::remove).
    pub async fn force_logout(&self, username: &str) -> AuthResult<()> {
        self.remove(username).await?;
        tracing::info!(username = %username, "user forcibly logged out");
        Ok(())
    }
}

//! Multi-device policy: concurrent sessions per principal, tracked
//! through a per-principal token set.

use std::time::Duration;

use parapet_core::{AuthError, AuthResult, SessionRecord};
use parapet_store::StoreBackend;

use super::{device_set_key, read_record, session_key, token_key};

/// Registry keeping one session per active token, with a device set per
/// principal as the membership index.
#[derive(Clone)]
pub struct MultiDeviceRegistry {
    store: StoreBackend,
}

impl MultiDeviceRegistry {
    pub(super) fn new(store: StoreBackend) -> Self {
        Self { store }
    }

    pub(super) fn store(&self) -> &StoreBackend {
        &self.store
    }

    pub(super) async fn save(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| AuthError::malformed_session(e.to_string()))?;

        self.store
            .set_ex(&session_key(&record.token), &json, ttl)
            .await?;
        self.store
            .set_ex(&token_key(&record.token), &record.username, ttl)
            .await?;

        // Device-set lifetime mirrors the newest session; stale members
        // are pruned lazily by readers.
        let set_key = device_set_key(&record.username);
        self.store.sadd(&set_key, &record.token).await?;
        self.store.expire(&set_key, ttl).await?;

        tracing::info!(username = %record.username, ttl_secs = ttl.as_secs(), "device session saved");
        Ok(())
    }

    /// First resolvable device session; prunes set members whose payload
    /// is gone.
    pub(super) async fn resolve_by_username(
        &self,
        username: &str,
    ) -> AuthResult<Option<SessionRecord>> {
        let set_key = device_set_key(username);
        let mut found = None;
        for token in self.store.smembers(&set_key).await? {
            match read_record(&self.store, &session_key(&token)).await? {
                Some(record) => {
                    found = Some(record);
                    break;
                }
                None => {
                    self.evict_device(username, &token).await?;
                }
            }
        }
        Ok(found)
    }

    pub(super) async fn resolve_by_token(
        &self,
        token: &str,
    ) -> AuthResult<Option<SessionRecord>> {
        Ok(read_record(&self.store, &session_key(token)).await?)
    }

    pub(super) async fn resolve_all_by_username(
        &self,
        username: &str,
    ) -> AuthResult<Vec<SessionRecord>> {
        let set_key = device_set_key(username);
        let mut sessions = Vec::new();
        for token in self.store.smembers(&set_key).await? {
            match read_record(&self.store, &session_key(&token)).await? {
                Some(record) => sessions.push(record),
                None => {
                    self.evict_device(username, &token).await?;
                }
            }
        }
        Ok(sessions)
    }

    pub(super) async fn remove(&self, username: &str) -> AuthResult<()> {
        let set_key = device_set_key(username);
        for token in self.store.smembers(&set_key).await? {
            self.store.del(&session_key(&token)).await?;
            self.store.del(&token_key(&token)).await?;
        }
        self.store.del(&set_key).await?;
        tracing::info!(username = %username, "all device sessions removed");
        Ok(())
    }

    pub(super) async fn remove_by_token(&self, token: &str) -> AuthResult<()> {
        let Some(username) = self.store.get(&token_key(token)).await? else {
            return Ok(());
        };
        self.store.del(&session_key(token)).await?;
        self.store.del(&token_key(token)).await?;
        self.store.srem(&device_set_key(&username), token).await?;
        tracing::info!(username = %username, "device session removed");
        Ok(())
    }

    /// Refreshes every device session plus the device set. O(device count).
    pub(super) async fn extend_expiry(&self, username: &str, ttl: Duration) -> AuthResult<()> {
        let set_key = device_set_key(username);
        let tokens = self.store.smembers(&set_key).await?;
        if tokens.is_empty() {
            return Ok(());
        }
        for token in &tokens {
            self.store.expire(&session_key(token), ttl).await?;
            self.store.expire(&token_key(token), ttl).await?;
        }
        self.store.expire(&set_key, ttl).await?;
        tracing::debug!(
            username = %username,
            devices = tokens.len(),
            ttl_secs = ttl.as_secs(),
            "device session expiry extended"
        );
        Ok(())
    }

    pub(super) async fn extend_expiry_by_token(
        &self,
        token: &str,
        ttl: Duration,
    ) -> AuthResult<()> {
        if self.store.get(&token_key(token)).await?.is_none() {
            return Ok(());
        }
        self.store.expire(&session_key(token), ttl).await?;
        self.store.expire(&token_key(token), ttl).await?;
        Ok(())
    }

    /// Device-set membership is an upper bound: a member whose payload
    /// already expired still counts until a reader evicts it.
    pub(super) async fn is_online(&self, username: &str) -> AuthResult<bool> {
        Ok(!self
            .store
            .smembers(&device_set_key(username))
            .await?
            .is_empty())
    }

    pub(super) async fn online_device_count(&self, username: &str) -> AuthResult<usize> {
        Ok(self.store.smembers(&device_set_key(username)).await?.len())
    }

    async fn evict_device(&self, username: &str, token: &str) -> AuthResult<()> {
        self.store.srem(&device_set_key(username), token).await?;
        self.store.del(&token_key(token)).await?;
        tracing::debug!(username = %username, "evicted stale device-set member");
        Ok(())
    }
}

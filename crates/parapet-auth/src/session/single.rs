//! Single-device policy: at most one active session per principal.

use std::time::Duration;

use parapet_core::{AuthError, AuthResult, SessionRecord};
use parapet_store::StoreBackend;

use super::{read_record, session_key, token_key};

/// Registry keeping one session per principal, keyed by username.
#[derive(Clone)]
pub struct SingleDeviceRegistry {
    store: StoreBackend,
}

impl SingleDeviceRegistry {
    pub(super) fn new(store: StoreBackend) -> Self {
        Self { store }
    }

    pub(super) fn store(&self) -> &StoreBackend {
        &self.store
    }

    pub(super) async fn save(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<()> {
        // Best-effort revoke of the previous token's index entry.
        if let Some(old) = read_record(&self.store, &session_key(&record.username)).await? {
            if old.token != record.token {
                self.store.del(&token_key(&old.token)).await?;
                tracing::info!(
                    username = %record.username,
                    "re-login revoked previous token index"
                );
            }
        }

        let json = serde_json::to_string(record)
            .map_err(|e| AuthError::malformed_session(e.to_string()))?;
        self.store
            .set_ex(&session_key(&record.username), &json, ttl)
            .await?;
        self.store
            .set_ex(&token_key(&record.token), &record.username, ttl)
            .await?;

        tracing::info!(username = %record.username, ttl_secs = ttl.as_secs(), "session saved");
        Ok(())
    }

    pub(super) async fn resolve_by_username(
        &self,
        username: &str,
    ) -> AuthResult<Option<SessionRecord>> {
        Ok(read_record(&self.store, &session_key(username)).await?)
    }

    pub(super) async fn resolve_by_token(
        &self,
        token: &str,
    ) -> AuthResult<Option<SessionRecord>> {
        let Some(username) = self.store.get(&token_key(token)).await? else {
            return Ok(None);
        };
        let record = self.resolve_by_username(&username).await?;
        if record.is_none() {
            // Index without payload, e.g. an interrupted save. Evict it.
            self.store.del(&token_key(token)).await?;
        }
        Ok(record)
    }

    pub(super) async fn resolve_all_by_username(
        &self,
        username: &str,
    ) -> AuthResult<Vec<SessionRecord>> {
        Ok(self.resolve_by_username(username).await?.into_iter().collect())
    }

    pub(super) async fn remove(&self, username: &str) -> AuthResult<()> {
        if let Some(session) = self.resolve_by_username(username).await? {
            self.store.del(&token_key(&session.token)).await?;
        }
        self.store.del(&session_key(username)).await?;
        tracing::info!(username = %username, "session removed");
        Ok(())
    }

    pub(super) async fn remove_by_token(&self, token: &str) -> AuthResult<()> {
        // There is only ever one session, so this is a full logout.
        let Some(username) = self.store.get(&token_key(token)).await? else {
            return Ok(());
        };
        self.remove(&username).await
    }

    pub(super) async fn extend_expiry(&self, username: &str, ttl: Duration) -> AuthResult<()> {
        let Some(session) = self.resolve_by_username(username).await? else {
            return Ok(());
        };
        self.store.expire(&session_key(username), ttl).await?;
        self.store.expire(&token_key(&session.token), ttl).await?;
        tracing::debug!(username = %username, ttl_secs = ttl.as_secs(), "session expiry extended");
        Ok(())
    }

    pub(super) async fn extend_expiry_by_token(
        &self,
        token: &str,
        ttl: Duration,
    ) -> AuthResult<()> {
        let Some(username) = self.store.get(&token_key(token)).await? else {
            return Ok(());
        };
        self.extend_expiry(&username, ttl).await
    }

    pub(super) async fn is_online(&self, username: &str) -> AuthResult<bool> {
        Ok(self.store.exists(&session_key(username)).await?)
    }

    pub(super) async fn online_device_count(&self, username: &str) -> AuthResult<usize> {
        Ok(usize::from(self.is_online(username).await?))
    }
}

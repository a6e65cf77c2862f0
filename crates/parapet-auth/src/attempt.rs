//! Login attempt guard: failed-login tracking and temporary lockout.
//!
//! Per-principal state machine, kept entirely in the shared store:
//!
//! ```text
//! UNLOCKED --failure x1..N-1--> COUNTING --failure xN--> LOCKED
//! COUNTING --success--> UNLOCKED        LOCKED --TTL expiry or unlock--> UNLOCKED
//! ```
//!
//! Two keys per principal: `login:attempt:{username}` holds the failure
//! counter (TTL set once, on the first failure), `login:locked:{username}`
//! is the lock flag whose remaining TTL is the remaining lockout. The two
//! are mutually exclusive in steady state: reaching the threshold creates
//! the flag and then deletes the counter.
//!
//! Store failures never block logins: `check_locked` fails open and
//! `record_failure` may silently under-count, both logged.

use std::sync::Arc;

use serde::Serialize;

use parapet_core::{AuthError, AuthResult, LockoutConfig};
use parapet_store::StoreBackend;

use crate::directory::PrincipalDirectory;

const ATTEMPT_KEY_PREFIX: &str = "login:attempt:";
const LOCKED_KEY_PREFIX: &str = "login:locked:";

fn attempt_key(username: &str) -> String {
    format!("{ATTEMPT_KEY_PREFIX}{username}")
}

fn locked_key(username: &str) -> String {
    format!("{LOCKED_KEY_PREFIX}{username}")
}

/// Snapshot of a principal's attempt state, for user-facing messaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptInfo {
    /// Whether the account is currently locked.
    pub locked: bool,
    /// Consecutive failures recorded so far.
    pub current_attempts: u32,
    /// Attempts left before lockout. `None` when the feature is disabled.
    pub remaining_attempts: Option<u32>,
    /// Seconds until an active lock expires, 0 when unlocked.
    pub lock_remaining_seconds: u64,
    /// Configured failure threshold.
    pub max_attempts: u32,
}

/// Decides whether a principal may attempt authentication and keeps the
/// failure bookkeeping.
pub struct LoginAttemptGuard {
    store: StoreBackend,
    config: LockoutConfig,
    directory: Option<Arc<dyn PrincipalDirectory>>,
}

impl LoginAttemptGuard {
    /// Create a guard without a principal directory.
    #[must_use]
    pub fn new(store: StoreBackend, config: LockoutConfig) -> Self {
        Self {
            store,
            config,
            directory: None,
        }
    }

    /// Attach the upstream principal directory used for the
    /// anti-enumeration check.
    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn PrincipalDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Whether the feature is administratively enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Fails with [`AuthError::AccountLocked`] if the principal is locked.
    ///
    /// Called by the credential verification collaborator before checking
    /// the password. When the principal does not exist in the directory,
    /// a failure is recorded so enumeration attempts look identical to a
    /// wrong password. A no-op when the feature is disabled; fails open
    /// when the store is unreachable.
    pub async fn check_locked(&self, username: &str) -> AuthResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        match self.store.exists(&locked_key(username)).await {
            Ok(true) => {
                let remaining_seconds = self.lock_remaining_seconds(username).await;
                return Err(AuthError::account_locked(remaining_seconds));
            }
            Ok(false) => {}
            Err(e) => {
                // Fail open: an unreachable store must not turn into a
                // login outage.
                tracing::warn!(username = %username, error = %e, "lock check failed, allowing attempt");
                return Ok(());
            }
        }

        if let Some(directory) = &self.directory {
            match directory.exists(username).await {
                Ok(true) => {}
                Ok(false) => {
                    self.record_failure(username).await;
                }
                Err(e) => {
                    tracing::warn!(username = %username, error = %e, "principal lookup failed, skipping check");
                }
            }
        }

        Ok(())
    }

    /// Record a failed login. Locks the account when the failure count
    /// reaches the configured maximum.
    pub async fn record_failure(&self, username: &str) {
        if !self.config.enabled {
            return;
        }

        let attempt_key = attempt_key(username);
        let attempts = match self.store.incr(&attempt_key).await {
            Ok(attempts) => attempts,
            Err(e) => {
                // Under-counting is the accepted degradation here.
                tracing::warn!(username = %username, error = %e, "login failure not recorded");
                return;
            }
        };

        // TTL only on creation; later failures must not push the window out.
        if attempts == 1 {
            if let Err(e) = self
                .store
                .expire(&attempt_key, self.config.lock_duration())
                .await
            {
                tracing::warn!(username = %username, error = %e, "failed to set attempt counter TTL");
            }
        }

        tracing::warn!(
            username = %username,
            attempts,
            max_attempts = self.config.max_attempts,
            "login failure recorded"
        );

        if attempts >= i64::from(self.config.max_attempts) {
            tracing::warn!(
                username = %username,
                lock_duration_minutes = self.config.lock_duration_minutes,
                "max login attempts reached, locking account"
            );
            if let Err(e) = self
                .store
                .set_ex(&locked_key(username), "locked", self.config.lock_duration())
                .await
            {
                // Keep the counter so the next failure retries the lock.
                tracing::warn!(username = %username, error = %e, "failed to create lock flag");
                return;
            }
            // Counter goes only after the lock flag exists.
            if let Err(e) = self.store.del(&attempt_key).await {
                tracing::warn!(username = %username, error = %e, "failed to clear attempt counter");
            }
        }
    }

    /// Record a successful login: clears the failure counter. The lock
    /// flag is untouched; a locked principal never reaches this call
    /// because `check_locked` fails first.
    pub async fn record_success(&self, username: &str) {
        if !self.config.enabled {
            return;
        }

        if let Err(e) = self.store.del(&attempt_key(username)).await {
            tracing::warn!(username = %username, error = %e, "failed to clear attempt counter");
            return;
        }
        tracing::debug!(username = %username, "login succeeded, attempt counter cleared");
    }

    /// Administrative unlock: clears both the counter and the lock flag,
    /// regardless of the enabled switch.
    pub async fn unlock(&self, username: &str) -> AuthResult<()> {
        self.store.del(&attempt_key(username)).await?;
        self.store.del(&locked_key(username)).await?;
        tracing::info!(username = %username, "account manually unlocked");
        Ok(())
    }

    /// Attempts left before lockout. `None` when the feature is disabled
    /// (no limit applies), `Some(0)` when locked.
    pub async fn remaining_attempts(&self, username: &str) -> Option<u32> {
        if !self.config.enabled {
            return None;
        }
        if self.is_locked(username).await {
            return Some(0);
        }
        let current = self.current_attempts(username).await;
        Some(self.config.max_attempts.saturating_sub(current))
    }

    /// Consecutive failures recorded so far.
    pub async fn current_attempts(&self, username: &str) -> u32 {
        match self.store.get(&attempt_key(username)).await {
            Ok(Some(value)) => value.parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(username = %username, error = %e, "failed to read attempt counter");
                0
            }
        }
    }

    /// Whether the principal is currently locked. Fail-safe: store errors
    /// read as "not locked".
    pub async fn is_locked(&self, username: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        match self.store.exists(&locked_key(username)).await {
            Ok(locked) => locked,
            Err(e) => {
                tracing::warn!(username = %username, error = %e, "lock check failed, treating as unlocked");
                false
            }
        }
    }

    /// Seconds until an active lock expires. Zero when unlocked or when
    /// the feature is disabled.
    pub async fn lock_remaining_seconds(&self, username: &str) -> u64 {
        if !self.config.enabled {
            return 0;
        }
        match self.store.ttl(&locked_key(username)).await {
            Ok(Some(remaining)) => remaining.as_secs(),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(username = %username, error = %e, "failed to read lock TTL");
                0
            }
        }
    }

    /// Full attempt-state snapshot for user-facing messaging.
    pub async fn attempt_info(&self, username: &str) -> AttemptInfo {
        let locked = self.is_locked(username).await;
        let current_attempts = if locked {
            0
        } else {
            self.current_attempts(username).await
        };
        AttemptInfo {
            locked,
            current_attempts,
            remaining_attempts: self.remaining_attempts(username).await,
            lock_remaining_seconds: if locked {
                self.lock_remaining_seconds(username).await
            } else {
                0
            },
            max_attempts: self.config.max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn guard(max_attempts: u32, lock_duration_minutes: u64) -> LoginAttemptGuard {
        LoginAttemptGuard::new(
            StoreBackend::new_memory(),
            LockoutConfig {
                enabled: true,
                max_attempts,
                lock_duration_minutes,
            },
        )
    }

    /// A Redis-tier store whose pool can never hand out a connection.
    fn unreachable_store() -> StoreBackend {
        let pool = deadpool_redis::Config::from_url("redis://127.0.0.1:1")
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .unwrap();
        StoreBackend::new_redis(pool)
    }

    struct FixedDirectory {
        known: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl PrincipalDirectory for FixedDirectory {
        async fn exists(&self, username: &str) -> AuthResult<bool> {
            Ok(self.known.contains(&username))
        }
    }

    #[tokio::test]
    async fn test_locks_after_max_attempts() {
        let guard = guard(3, 1);

        for _ in 0..2 {
            guard.record_failure("alice").await;
            assert!(!guard.is_locked("alice").await);
        }
        guard.record_failure("alice").await;

        assert!(guard.is_locked("alice").await);
        // Counter is gone once the lock flag exists.
        assert_eq!(guard.current_attempts("alice").await, 0);
        assert_eq!(guard.remaining_attempts("alice").await, Some(0));

        let err = guard.check_locked("alice").await.unwrap_err();
        assert!(err.is_locked());
    }

    #[tokio::test]
    async fn test_lock_remaining_seconds_tracks_duration() {
        let guard = guard(3, 1);
        for _ in 0..3 {
            guard.record_failure("alice").await;
        }
        let remaining = guard.lock_remaining_seconds("alice").await;
        assert!((55..=60).contains(&remaining), "remaining = {remaining}");
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let guard = guard(5, 30);
        guard.record_failure("bob").await;
        guard.record_failure("bob").await;
        assert_eq!(guard.remaining_attempts("bob").await, Some(3));

        guard.record_success("bob").await;
        assert_eq!(guard.remaining_attempts("bob").await, Some(5));
        assert_eq!(guard.current_attempts("bob").await, 0);
    }

    #[tokio::test]
    async fn test_unlock_clears_everything() {
        let guard = guard(3, 1);
        for _ in 0..3 {
            guard.record_failure("alice").await;
        }
        assert!(guard.is_locked("alice").await);

        guard.unlock("alice").await.unwrap();
        assert!(!guard.is_locked("alice").await);
        assert!(guard.check_locked("alice").await.is_ok());
        assert_eq!(guard.remaining_attempts("alice").await, Some(3));
    }

    #[tokio::test]
    async fn test_disabled_guard_is_noop() {
        let guard = LoginAttemptGuard::new(
            StoreBackend::new_memory(),
            LockoutConfig {
                enabled: false,
                max_attempts: 1,
                lock_duration_minutes: 30,
            },
        );

        guard.record_failure("alice").await;
        guard.record_failure("alice").await;
        assert!(!guard.is_locked("alice").await);
        assert!(guard.check_locked("alice").await.is_ok());
        assert_eq!(guard.remaining_attempts("alice").await, None);
        assert_eq!(guard.lock_remaining_seconds("alice").await, 0);
    }

    #[tokio::test]
    async fn test_unknown_principal_burns_an_attempt() {
        let guard = guard(3, 1).with_directory(Arc::new(FixedDirectory {
            known: vec!["alice"],
        }));

        // Unknown user: each check records a failure, so three probes
        // lock the phantom account and the fourth sees the lock.
        for _ in 0..3 {
            guard.check_locked("mallory").await.unwrap();
        }
        assert!(guard.is_locked("mallory").await);
        let err = guard.check_locked("mallory").await.unwrap_err();
        assert!(err.is_locked());

        // Known user: checks alone never consume attempts.
        guard.check_locked("alice").await.unwrap();
        assert_eq!(guard.remaining_attempts("alice").await, Some(3));
    }

    #[tokio::test]
    async fn test_record_failure_under_counts_on_store_error() {
        let guard = guard(1, 1);
        guard
            .store
            .set_ex(&attempt_key("alice"), "garbage", Duration::from_secs(60))
            .await
            .unwrap();

        // INCR fails on the non-numeric counter, so the failure is dropped
        // and the account stays unlocked even at max_attempts = 1.
        guard.record_failure("alice").await;
        assert!(!guard.is_locked("alice").await);
        assert!(guard.check_locked("alice").await.is_ok());
    }

    #[tokio::test]
    async fn test_check_locked_fails_open_when_store_unreachable() {
        let guard = LoginAttemptGuard::new(
            unreachable_store(),
            LockoutConfig {
                enabled: true,
                max_attempts: 1,
                lock_duration_minutes: 1,
            },
        );

        guard.record_failure("alice").await;
        assert!(guard.check_locked("alice").await.is_ok());
        assert!(!guard.is_locked("alice").await);
        assert_eq!(guard.remaining_attempts("alice").await, Some(1));
        assert_eq!(guard.lock_remaining_seconds("alice").await, 0);
    }

    #[tokio::test]
    async fn test_counter_ttl_set_only_on_first_failure() {
        let guard = guard(5, 1);
        guard.record_failure("carol").await;
        let first = guard.store.ttl(&attempt_key("carol")).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        guard.record_failure("carol").await;
        let second = guard.store.ttl(&attempt_key("carol")).await.unwrap().unwrap();

        // The second failure must not refresh the window.
        assert!(second < first);
    }

    #[tokio::test]
    async fn test_attempt_info_snapshot() {
        let guard = guard(5, 30);
        guard.record_failure("dave").await;
        guard.record_failure("dave").await;

        let info = guard.attempt_info("dave").await;
        assert!(!info.locked);
        assert_eq!(info.current_attempts, 2);
        assert_eq!(info.remaining_attempts, Some(3));
        assert_eq!(info.lock_remaining_seconds, 0);
        assert_eq!(info.max_attempts, 5);
    }
}

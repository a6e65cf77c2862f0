//! Principal directory collaborator trait.

use async_trait::async_trait;

use parapet_core::AuthResult;

/// Lookup seam into the upstream user store.
///
/// The control plane never reads user rows itself; the credential
/// verification collaborator supplies an implementation so the login
/// attempt guard can burn an attempt for unknown principals (an
/// anti-enumeration measure: "no such user" must be indistinguishable
/// from "wrong password").
///
/// # Errors
///
/// Implementations should return a `Store` error when the upstream
/// lookup fails; the guard logs it and continues without the check.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Returns `true` if the principal exists and may authenticate.
    async fn exists(&self, username: &str) -> AuthResult<bool>;
}

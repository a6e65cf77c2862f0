//! Session record and device-policy types.
//!
//! A [`SessionRecord`] is the serialized payload the registry keeps in the
//! shared store for every active bearer token. The control plane never
//! inspects the token itself; it is an opaque key minted by the token
//! issuance collaborator.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Device policy for the session registry, chosen once at construction.
///
/// - `Single`: one active session per principal; a new login revokes the
///   previous token (best effort, see `SessionRegistry::save`).
/// - `Multiple`: one session per device; sessions for the same principal
///   coexist and are tracked through a per-principal token set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPolicy {
    /// Single active session per principal (new login kicks the old one).
    Single,
    /// Concurrent sessions across devices.
    Multiple,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::Multiple
    }
}

/// An active login session stored in the shared store.
///
/// Keyed by principal under the single-device policy, by token under the
/// multi-device policy. Client metadata is supplied by the credential
/// verification collaborator at login time and is carried verbatim for
/// "who is online" style queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Principal (account identifier) that owns the session.
    pub username: String,

    /// Display name for admin dashboards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Opaque bearer token issued for this session.
    pub token: String,

    /// Timestamp when the session was established.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// Timestamp when the session expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Client IP the session was established from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    /// Geolocation string resolved from the client IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Browser derived from the user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,

    /// Operating system derived from the user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    /// Device policy the session was registered under.
    #[serde(default)]
    pub policy: SessionPolicy,
}

impl SessionRecord {
    /// Returns `true` if the session's own expiry timestamp has passed.
    ///
    /// The store TTL is authoritative; this is a convenience for readers
    /// that already hold a deserialized record.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }
}

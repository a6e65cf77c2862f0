//! Control-plane error types.
//!
//! This module defines the errors surfaced by the login attempt guard,
//! the session registry and the rate limiter.
//!
//! The locked-account condition is a typed variant rather than a control
//! flow exception: callers that run the login pipeline must handle
//! [`AuthError::AccountLocked`] explicitly and can read the remaining
//! lockout time straight out of it.

use std::fmt;

/// Errors that can occur during control-plane operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The account is temporarily locked after too many failed logins.
    ///
    /// Carries the remaining lockout time, computed from the lock flag's
    /// TTL at the moment of the check.
    #[error("account locked, retry in {remaining_seconds} seconds")]
    AccountLocked {
        /// Seconds until the lock expires on its own.
        remaining_seconds: u64,
    },

    /// The shared store could not be reached or a command failed.
    ///
    /// Never surfaced verbatim to end users; each component applies its
    /// documented fail-open or fail-safe default and logs the cause.
    #[error("store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
    },

    /// A stored session payload failed to deserialize.
    ///
    /// Treated as if the session did not exist; the corrupt entry is
    /// deleted by the reader that discovers it.
    #[error("malformed session data: {message}")]
    MalformedSession {
        /// Description of the deserialization failure.
        message: String,
    },

    /// The control-plane configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `AccountLocked` error.
    #[must_use]
    pub fn account_locked(remaining_seconds: u64) -> Self {
        Self::AccountLocked { remaining_seconds }
    }

    /// Creates a new `Store` error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates a new `MalformedSession` error.
    #[must_use]
    pub fn malformed_session(message: impl Into<String>) -> Self {
        Self::MalformedSession {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if this error means the account is locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::AccountLocked { .. })
    }

    /// Returns `true` if this is an infrastructure-side error.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Store { .. } | Self::MalformedSession { .. } | Self::Configuration { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AccountLocked { .. } => ErrorCategory::Lockout,
            Self::Store { .. } => ErrorCategory::Infrastructure,
            Self::MalformedSession { .. } => ErrorCategory::Session,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }
}

/// Categories of control-plane errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Brute-force lockout conditions.
    Lockout,
    /// Session bookkeeping errors.
    Session,
    /// Shared-store infrastructure errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lockout => write!(f, "lockout"),
            Self::Session => write!(f, "session"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

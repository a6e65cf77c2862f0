//! Core types for the Parapet authentication security control plane.
//!
//! This crate carries the pieces shared by every component: the error
//! taxonomy, the session record and policy types, and the configuration
//! surface. It has no knowledge of the backing store; that lives in
//! `parapet-store`.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ControlPlaneConfig, LockoutConfig, RateLimitConfig, SessionConfig, StoreConfig,
};
pub use error::{AuthError, ErrorCategory};
pub use types::{SessionPolicy, SessionRecord};

/// Result alias used across the control plane.
pub type AuthResult<T> = Result<T, AuthError>;

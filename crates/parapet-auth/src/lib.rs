//! Parapet authentication security control plane.
//!
//! Three components coordinate mutable, time-expiring state through one
//! shared store ([`parapet_store::StoreBackend`]):
//!
//! - [`LoginAttemptGuard`] — failed-login tracking and temporary lockout
//! - [`SessionRegistry`] — which bearer tokens are valid for which
//!   principal, under a single- or multi-device policy fixed at startup
//! - [`RequestRateLimiter`] — sliding-window throughput cap per
//!   (client identity, path)
//!
//! The components are independent of each other; each owns its key
//! namespace in the store and is safe to call from any number of
//! concurrent request handlers. Multi-step sequences are documented as
//! best-effort rather than transactional; see the per-component docs.
//!
//! Credential verification and token issuance are collaborators: they
//! call `check_locked` / `record_failure` / `record_success` around the
//! password check and `save` after minting a token. The one modeled seam
//! into them is [`PrincipalDirectory`].

pub mod attempt;
pub mod directory;
pub mod ratelimit;
pub mod session;

pub use attempt::{AttemptInfo, LoginAttemptGuard};
pub use directory::PrincipalDirectory;
pub use ratelimit::{RateDecision, RequestRateLimiter, resolve_client_id};
pub use session::SessionRegistry;

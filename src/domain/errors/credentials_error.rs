//! Errors raised while resolving a caller's identity over the bus.
//!
//! A failed bus query is not modeled here: per §4.3 it resolves to
//! `Credentials::invalid()` and is cached/broadcast like any other result,
//! not propagated as an error.

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("peer disconnected before credentials could be resolved")]
    PeerGone,
}

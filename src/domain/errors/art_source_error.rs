//! Errors raised by the Art Source Adapter (local extraction and remote download).

/// Outcome classes a source adapter can fail with (§4.4, §7).
///
/// Converted into a `ServiceError` of the same shape at the handler
/// boundary; see `ServiceError::failure_reason` and
/// `FailureReason::is_cacheable` for how these map onto A-fail admission.
#[derive(Debug, thiserror::Error)]
pub enum ArtSourceError {
    #[error("no embedded or remote art available")]
    NotFound,

    #[error("could not decode image data: {0}")]
    DecodeError(String),

    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("credentials denied access to this source")]
    PolicyDenied,

    #[error("internal error in art source adapter: {0}")]
    Internal(String),
}

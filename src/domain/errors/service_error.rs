//! The error taxonomy surfaced across the IPC boundary (§7).
//!
//! Every request either yields bytes or one of these five classes. Only
//! `NotFound` and `DecodeError` are cached with a TTL (see
//! `FailureReason::is_cacheable`); `PolicyDenied` and `TransientNetwork` are
//! never cached so a later retry is not poisoned by a one-off failure, and
//! `Internal` is logged but otherwise treated like a transient failure.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("access denied by credentials policy")]
    PolicyDenied,

    #[error("no thumbnail or art could be produced for this request")]
    NotFound,

    #[error("source data could not be decoded: {0}")]
    DecodeError(String),

    #[error("transient failure, retry later: {0}")]
    TransientNetwork(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Classifies this error for the failure cache, independent of whether
    /// the class is durable enough to admit; callers must still consult
    /// `FailureReason::is_cacheable` before writing a record.
    #[must_use]
    pub fn failure_reason(&self) -> Option<super::super::entities::FailureReason> {
        use super::super::entities::FailureReason;
        match self {
            ServiceError::PolicyDenied => Some(FailureReason::PolicyDenied),
            ServiceError::NotFound => Some(FailureReason::NotFound),
            ServiceError::DecodeError(_) => Some(FailureReason::DecodeError),
            ServiceError::TransientNetwork(_) => Some(FailureReason::TransientNetwork),
            ServiceError::Internal(_) => None,
        }
    }
}

impl From<super::ArtSourceError> for ServiceError {
    fn from(err: super::ArtSourceError) -> Self {
        match err {
            super::ArtSourceError::NotFound => ServiceError::NotFound,
            super::ArtSourceError::DecodeError(msg) => ServiceError::DecodeError(msg),
            super::ArtSourceError::TransientNetwork(msg) => ServiceError::TransientNetwork(msg),
            super::ArtSourceError::PolicyDenied => ServiceError::PolicyDenied,
            super::ArtSourceError::Internal(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<super::CacheError> for ServiceError {
    fn from(err: super::CacheError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

impl From<super::CredentialsError> for ServiceError {
    fn from(err: super::CredentialsError) -> Self {
        match err {
            super::CredentialsError::PeerGone => ServiceError::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

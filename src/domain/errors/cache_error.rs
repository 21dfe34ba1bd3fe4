//! Errors raised by the persistent cache (A-image / A-thumb / A-fail).

/// Failures internal to reading, writing or evicting cache entries.
///
/// These never reach a caller directly; the [`crate::application::services`]
/// layer maps them onto [`crate::domain::errors::ServiceError::Internal`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize cache metadata: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache entry {0} exceeds the configured capacity on its own")]
    EntryTooLarge(String),

    #[error("invalid cache_id: {0}")]
    InvalidCacheId(#[from] super::super::entities::InvalidCacheId),
}

//! Domain entity definitions.

mod cache_entry;
mod cache_key;
mod credentials;
mod handler_state;
mod request;

pub use cache_entry::{
    AllStats, CacheId, CacheStats, CachedEntry, FailureReason, FailureRecord, InvalidCacheId,
    HISTOGRAM_BUCKETS,
};
pub use cache_key::{CacheKey, DerivedKey, Fingerprint};
pub use credentials::Credentials;
pub use handler_state::HandlerState;
pub use request::{ArtKind, TargetSize, ThumbnailRequest, MAX_SIZE};

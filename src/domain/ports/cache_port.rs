//! Port for the persistent content-addressed cache (A-image / A-thumb / A-fail).

use crate::domain::entities::CacheStats;
use crate::domain::errors::CacheError;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// One of the three persistent cache instances.
///
/// A single implementation is parameterized per instance (image/thumbnail
/// hold raw bytes, failure holds a serialized [`crate::domain::entities::FailureRecord`]);
/// the port only speaks in raw bytes so the three instances share one
/// eviction/compaction/statistics implementation.
#[async_trait::async_trait]
pub trait PersistentCachePort: Send + Sync {
    /// Looks up `key`, refreshing its LRU recency on hit.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Admits `value` under `key`, evicting older entries if needed to stay
    /// under the configured capacity.
    async fn put(&self, key: &str, value: Vec<u8>) -> CacheResult<()>;

    async fn contains(&self, key: &str) -> CacheResult<bool>;

    /// Removes a single entry, if present.
    async fn invalidate(&self, key: &str) -> CacheResult<()>;

    /// Drops every entry and resets statistics.
    async fn clear(&self) -> CacheResult<()>;

    /// Reclaims space taken by entries that failed to be cleaned up after a
    /// crash (stale `*.tmp` files) without touching live entries.
    async fn compact(&self) -> CacheResult<()>;

    async fn stats(&self) -> CacheStats;

    /// Resets the hit/miss/histogram counters without discarding entries.
    async fn clear_stats(&self);
}

//! Entries stored in, and statistics reported by, the persistent caches (§3, §4.1).

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A content entry as stored by the persistent cache.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub bytes: Bytes,
    pub created_at: SystemTime,
    pub last_access: SystemTime,
}

impl CachedEntry {
    #[must_use]
    pub fn new(bytes: Bytes) -> Self {
        let now = SystemTime::now();
        Self {
            bytes,
            created_at: now,
            last_access: now,
        }
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// The reason class attached to a negative (failure) cache record.
///
/// Only `NotFound` and `DecodeError` are durable enough to cache; transient
/// classes are returned as errors but never stored (§4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    TransientNetwork,
    NotFound,
    DecodeError,
    PolicyDenied,
}

impl FailureReason {
    /// Whether this reason class is durable enough to admit into A-fail.
    #[must_use]
    pub fn is_cacheable(self) -> bool {
        matches!(self, FailureReason::NotFound | FailureReason::DecodeError)
    }
}

/// A negative cache record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub reason: FailureReason,
    pub created_at_epoch_secs: u64,
    pub ttl_secs: u64,
}

impl FailureRecord {
    #[must_use]
    pub fn new(reason: FailureReason, ttl: Duration) -> Self {
        let created_at_epoch_secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            reason,
            created_at_epoch_secs,
            ttl_secs: ttl.as_secs(),
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now.saturating_sub(self.created_at_epoch_secs) > self.ttl_secs
    }
}

/// Selects one of the three cache instances, per the admin wire interface
/// (§6: `cache_id ∈ {0=image, 1=thumbnail, 2=failure}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheId {
    Image = 0,
    Thumbnail = 1,
    Failure = 2,
}

impl TryFrom<i32> for CacheId {
    type Error = InvalidCacheId;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CacheId::Image),
            1 => Ok(CacheId::Thumbnail),
            2 => Ok(CacheId::Failure),
            other => Err(InvalidCacheId(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid cache_id {0}, expected 0 (image), 1 (thumbnail) or 2 (failure)")]
pub struct InvalidCacheId(pub i32);

/// Number of power-of-two age buckets in [`CacheStats::histogram`].
pub const HISTOGRAM_BUCKETS: usize = 32;

/// Statistics reported by `stats()` for one cache instance (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    /// Power-of-two bucketing of last-access-age (in seconds) at eviction or
    /// lookup time: `histogram[i]` counts ages in `[2^i, 2^(i+1))`.
    pub histogram: Vec<u64>,
}

impl CacheStats {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: 0,
            bytes: 0,
            hits: 0,
            misses: 0,
            histogram: vec![0; HISTOGRAM_BUCKETS],
        }
    }

    pub fn record_age(&mut self, age: Duration) {
        let secs = age.as_secs().max(1);
        let bucket = (63 - secs.leading_zeros()) as usize;
        let bucket = bucket.min(HISTOGRAM_BUCKETS - 1);
        self.histogram[bucket] += 1;
    }

    pub fn clear_counters(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.histogram = vec![0; HISTOGRAM_BUCKETS];
    }
}

/// The reply to the admin `Stats()` method: all three caches' statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllStats {
    pub image: CacheStats,
    pub thumbnail: CacheStats,
    pub failure: CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_id_round_trips() {
        assert_eq!(CacheId::try_from(0).unwrap(), CacheId::Image);
        assert_eq!(CacheId::try_from(1).unwrap(), CacheId::Thumbnail);
        assert_eq!(CacheId::try_from(2).unwrap(), CacheId::Failure);
        assert!(CacheId::try_from(3).is_err());
    }

    #[test]
    fn only_durable_failures_are_cacheable() {
        assert!(FailureReason::NotFound.is_cacheable());
        assert!(FailureReason::DecodeError.is_cacheable());
        assert!(!FailureReason::TransientNetwork.is_cacheable());
        assert!(!FailureReason::PolicyDenied.is_cacheable());
    }

    #[test]
    fn histogram_buckets_by_power_of_two() {
        let mut stats = CacheStats::empty();
        stats.record_age(Duration::from_secs(1));
        stats.record_age(Duration::from_secs(3));
        stats.record_age(Duration::from_secs(4));
        assert_eq!(stats.histogram[0], 1);
        assert_eq!(stats.histogram[1], 1);
        assert_eq!(stats.histogram[2], 1);
    }
}

//! Content-addressed, size-bounded, crash-safe disk cache.
//!
//! One instance of this type backs each of A-image, A-thumb and A-fail
//! (§3, §4.1). Entries are written atomically (`*.tmp` + `fsync` +
//! `rename(2)`) so a crash mid-write never leaves a torn file behind, and
//! eviction is strict LRU by last access, with `created_at` breaking ties
//! between entries accessed in the same fsync batch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use lru::LruCache;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheStats;
use crate::domain::errors::CacheError;
use crate::domain::ports::{CacheResult, PersistentCachePort};

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size: u64,
    created_at: SystemTime,
    last_access: SystemTime,
}

struct Index {
    lru: LruCache<String, IndexEntry>,
    total_bytes: u64,
}

/// A single cache instance rooted at `dir`, bounded to `capacity_bytes`.
pub struct PersistentCache {
    dir: PathBuf,
    capacity_bytes: u64,
    /// Per-entry admission cap; defaults to `capacity_bytes` (no extra
    /// restriction). A-image uses a tighter cap (§4.1: `capacity/8`).
    entry_cap_bytes: u64,
    index: RwLock<Index>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PersistentCache {
    /// Opens (creating if absent) the cache rooted at `dir`, rebuilding the
    /// in-memory LRU index from whatever is already on disk.
    pub async fn open(dir: PathBuf, capacity_bytes: u64) -> CacheResult<Self> {
        Self::open_with_entry_cap(dir, capacity_bytes, capacity_bytes).await
    }

    /// Like [`Self::open`], but rejects any single entry larger than
    /// `entry_cap_bytes` rather than the full cache capacity.
    pub async fn open_with_entry_cap(
        dir: PathBuf,
        capacity_bytes: u64,
        entry_cap_bytes: u64,
    ) -> CacheResult<Self> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| CacheError::Io {
                path: dir.clone(),
                source,
            })?;

        let mut entries: Vec<(String, IndexEntry)> = Vec::new();
        let mut read_dir = fs::read_dir(&dir).await.map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        while let Some(entry) = read_dir.next_entry().await.map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Ok(meta) = entry.metadata().await {
                let created_at = meta.created().unwrap_or(SystemTime::UNIX_EPOCH);
                let last_access = meta.accessed().unwrap_or(created_at);
                entries.push((
                    name.to_string(),
                    IndexEntry {
                        size: meta.len(),
                        created_at,
                        last_access,
                    },
                ));
            }
        }
        entries.sort_by_key(|(_, e)| e.created_at);

        let mut lru = LruCache::unbounded();
        let mut total_bytes = 0u64;
        for (key, entry) in entries {
            total_bytes += entry.size;
            lru.put(key, entry);
        }

        debug!(dir = %dir.display(), entries = lru.len(), total_bytes, "opened persistent cache");

        Ok(Self {
            dir,
            capacity_bytes,
            entry_cap_bytes,
            index: RwLock::new(Index { lru, total_bytes }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn tmp_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.tmp"))
    }

    /// Evicts entries in strict LRU order (oldest `created_at` among
    /// least-recently-used ties first) until `total_bytes <= capacity_bytes`.
    async fn evict_to_capacity(&self) {
        let mut victims: Vec<PathBuf> = Vec::new();
        {
            let mut index = self.index.write().await;
            while index.total_bytes > self.capacity_bytes {
                let Some((key, entry)) = index.lru.pop_lru() else {
                    break;
                };
                index.total_bytes = index.total_bytes.saturating_sub(entry.size);
                victims.push(self.path_for(&key));
            }
        }
        for path in victims {
            if let Err(err) = fs::remove_file(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), %err, "failed to remove evicted cache entry");
                }
            } else {
                trace!(path = %path.display(), "evicted cache entry");
            }
        }
    }
}

#[async_trait::async_trait]
impl PersistentCachePort for PersistentCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let present = {
            let mut index = self.index.write().await;
            match index.lru.get_mut(key) {
                Some(entry) => {
                    entry.last_access = SystemTime::now();
                    true
                }
                None => false,
            }
        };
        if !present {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        match fs::read(self.path_for(key)).await {
            Ok(bytes) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(bytes))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // Index and disk diverged (e.g. external removal); drop the
                // stale entry rather than report a false hit.
                let mut index = self.index.write().await;
                index.lru.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(source) => Err(CacheError::Io {
                path: self.path_for(key),
                source,
            }),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> CacheResult<()> {
        let size = value.len() as u64;
        if size > self.entry_cap_bytes {
            return Err(CacheError::EntryTooLarge(key.to_string()));
        }

        let tmp_path = self.tmp_path_for(key);
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|source| CacheError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        file.write_all(&value)
            .await
            .map_err(|source| CacheError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        file.sync_all().await.map_err(|source| CacheError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        drop(file);

        let final_path = self.path_for(key);
        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|source| CacheError::Io {
                path: final_path.clone(),
                source,
            })?;

        {
            let mut index = self.index.write().await;
            let now = SystemTime::now();
            if let Some(old) = index.lru.put(
                key.to_string(),
                IndexEntry {
                    size,
                    created_at: now,
                    last_access: now,
                },
            ) {
                index.total_bytes = index.total_bytes.saturating_sub(old.size);
            }
            index.total_bytes += size;
        }

        self.evict_to_capacity().await;
        Ok(())
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        let index = self.index.read().await;
        Ok(index.lru.peek(key).is_some())
    }

    async fn invalidate(&self, key: &str) -> CacheResult<()> {
        let removed = {
            let mut index = self.index.write().await;
            index.lru.pop(key).inspect(|entry| {
                index.total_bytes = index.total_bytes.saturating_sub(entry.size);
            })
        };
        if removed.is_some() {
            let _ = fs::remove_file(self.path_for(key)).await;
        }
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut index = self.index.write().await;
        let keys: Vec<String> = index.lru.iter().map(|(k, _)| k.clone()).collect();
        for key in keys {
            let _ = fs::remove_file(self.path_for(&key)).await;
        }
        index.lru.clear();
        index.total_bytes = 0;
        drop(index);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn compact(&self) -> CacheResult<()> {
        let mut read_dir = fs::read_dir(&self.dir)
            .await
            .map_err(|source| CacheError::Io {
                path: self.dir.clone(),
                source,
            })?;
        while let Some(entry) = read_dir.next_entry().await.map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                if let Err(err) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), %err, "failed to remove stale tmp file");
                } else {
                    debug!(path = %path.display(), "removed stale tmp file during compaction");
                }
            }
        }
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let index = self.index.read().await;
        let now = SystemTime::now();
        let mut stats = CacheStats::empty();
        for (_, entry) in index.lru.iter() {
            stats.record_age(now.duration_since(entry.last_access).unwrap_or_default());
        }
        stats.entries = index.lru.len() as u64;
        stats.bytes = index.total_bytes;
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        stats
    }

    async fn clear_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Joins the per-instance subdirectory name (`image`/`thumbnail`/`failure`)
/// onto the configured cache root.
#[must_use]
pub fn instance_dir(base: &Path, name: &str) -> PathBuf {
    base.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_cache(capacity: u64) -> (PersistentCache, TempDir) {
        let dir = TempDir::new().unwrap();
        let cache = PersistentCache::open(dir.path().to_path_buf(), capacity)
            .await
            .unwrap();
        (cache, dir)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (cache, _dir) = open_cache(1024).await;
        cache.put("a", b"hello".to_vec()).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let (cache, _dir) = open_cache(1024).await;
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn eviction_drops_least_recently_used() {
        let (cache, _dir) = open_cache(10).await;
        cache.put("a", vec![0u8; 4]).await.unwrap();
        cache.put("b", vec![0u8; 4]).await.unwrap();
        // touch "a" so "b" becomes the least recently used entry.
        let _ = cache.get("a").await.unwrap();
        cache.put("c", vec![0u8; 4]).await.unwrap();

        assert!(cache.contains("a").await.unwrap());
        assert!(!cache.contains("b").await.unwrap());
        assert!(cache.contains("c").await.unwrap());
    }

    #[tokio::test]
    async fn entry_larger_than_capacity_is_rejected() {
        let (cache, _dir) = open_cache(4).await;
        let err = cache.put("a", vec![0u8; 8]).await.unwrap_err();
        assert!(matches!(err, CacheError::EntryTooLarge(_)));
    }

    #[tokio::test]
    async fn entry_cap_is_independent_of_full_capacity() {
        let dir = TempDir::new().unwrap();
        let cache = PersistentCache::open_with_entry_cap(dir.path().to_path_buf(), 1024, 16)
            .await
            .unwrap();
        let err = cache.put("a", vec![0u8; 32]).await.unwrap_err();
        assert!(matches!(err, CacheError::EntryTooLarge(_)));
        cache.put("b", vec![0u8; 8]).await.unwrap();
    }

    #[tokio::test]
    async fn stats_histogram_buckets_by_last_access_not_creation() {
        let (cache, _dir) = open_cache(1024).await;
        cache.put("a", vec![0u8; 4]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        // A fresh `get` should refresh the bucket to "just now" rather than
        // leaving the entry aged by its original `created_at`.
        let _ = cache.get("a").await.unwrap();
        let stats = cache.stats().await;
        assert_eq!(stats.histogram[0], 1);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let (cache, _dir) = open_cache(1024).await;
        cache.put("a", b"x".to_vec()).await.unwrap();
        cache.clear().await.unwrap();
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.bytes, 0);
    }

    #[tokio::test]
    async fn compact_removes_stale_tmp_files() {
        let (cache, dir) = open_cache(1024).await;
        fs::write(dir.path().join("orphan.tmp"), b"x").await.unwrap();
        cache.compact().await.unwrap();
        assert!(!dir.path().join("orphan.tmp").exists());
    }

    #[tokio::test]
    async fn reopen_rebuilds_index_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let cache = PersistentCache::open(dir.path().to_path_buf(), 1024)
                .await
                .unwrap();
            cache.put("a", b"data".to_vec()).await.unwrap();
        }
        let reopened = PersistentCache::open(dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        assert_eq!(reopened.get("a").await.unwrap(), Some(b"data".to_vec()));
    }
}

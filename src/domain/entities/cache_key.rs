//! Cache key derivation (§3, §9 "Unicode normalization for cache keys").
//!
//! Mirrors the original thumbnailer's `md5("file://" + path)` scheme (see
//! `examples/original_source/src/thumbnailcache.cpp`), generalized to a
//! fingerprint-bound key for local files and an NFKC-normalized key for
//! remote art, both hashed with SHA-256 rather than MD5.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use icu_normalizer::ComposingNormalizer;
use sha2::{Digest, Sha256};

/// `(device, inode, size, mtime)` tuple used to detect local-file mutation
/// without reading file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub dev: u64,
    pub ino: u64,
    pub size: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
}

impl Fingerprint {
    #[must_use]
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            size: meta.size(),
            mtime_sec: meta.mtime(),
            mtime_nsec: meta.mtime_nsec(),
        }
    }

    fn canonical(&self) -> String {
        format!(
            "{}:{}:{}:{}.{:09}",
            self.dev, self.ino, self.size, self.mtime_sec, self.mtime_nsec
        )
    }
}

/// The cache key identifying content independent of requested display size.
///
/// Two flavors: local files (path + fingerprint, so a mutated file naturally
/// ages out under a fresh key) and remote art (normalized artist+album).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn for_local_file(path: &Path, fingerprint: Fingerprint) -> Self {
        Self(format!(
            "file:{}#{}",
            path.display(),
            fingerprint.canonical()
        ))
    }

    /// Lowercase, NFKC-normalized concatenation of artist and album, so that
    /// visually/semantically-equivalent free-text strings collapse onto the
    /// same cache entry (§9).
    #[must_use]
    pub fn for_remote_art(artist: &str, album: &str) -> Self {
        let normalizer = ComposingNormalizer::new_nfkc();
        let artist = normalizer.normalize(artist).to_lowercase();
        let album = normalizer.normalize(album).to_lowercase();
        Self(format!("art:{artist}\u{0}{album}"))
    }

    /// Stable hex digest used as the on-disk file name for this key.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest())
    }
}

/// `base_key ⊕ target_size`, after clamping — identifies one specific
/// rendered thumbnail artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivedKey(String);

impl DerivedKey {
    #[must_use]
    pub fn new(base: &CacheKey, width: u32, height: u32) -> Self {
        Self(format!("{}@{width}x{height}", base.as_str()))
    }

    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_art_keys_normalize_case() {
        let a = CacheKey::for_remote_art("Test Threads", "TEST_0");
        let b = CacheKey::for_remote_art("test threads", "test_0");
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn remote_art_keys_distinguish_artist_album_boundary() {
        // "ab" + "" must not collide with "a" + "b".
        let a = CacheKey::for_remote_art("ab", "");
        let b = CacheKey::for_remote_art("a", "b");
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn derived_key_differs_per_size() {
        let base = CacheKey::for_remote_art("artist", "album");
        let small = DerivedKey::new(&base, 48, 48);
        let large = DerivedKey::new(&base, 1920, 1920);
        assert_ne!(small.digest(), large.digest());
    }

    #[test]
    fn local_file_key_changes_with_fingerprint() {
        let path = Path::new("/music/cover.jpg");
        let fp1 = Fingerprint {
            dev: 1,
            ino: 2,
            size: 100,
            mtime_sec: 10,
            mtime_nsec: 0,
        };
        let fp2 = Fingerprint {
            size: 200,
            ..fp1
        };
        let k1 = CacheKey::for_local_file(path, fp1);
        let k2 = CacheKey::for_local_file(path, fp2);
        assert_ne!(k1.digest(), k2.digest());
    }
}

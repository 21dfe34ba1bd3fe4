//! Infrastructure layer with adapters for the filesystem, network and bus.

/// Local extraction and remote download adapters behind `ArtSourcePort`.
pub mod art_source;
/// Persistent, size-bounded disk cache backing A-image/A-thumb/A-fail.
pub mod cache;
/// Daemon configuration read from the environment.
pub mod config;
/// D-Bus credentials resolution and coalescing.
pub mod credentials;
/// D-Bus IPC surface (data path and admin interface).
pub mod ipc;
/// Concurrency limiter guarding downloads and extractions.
pub mod rate_limiter;

pub use art_source::CombinedArtSource;
pub use cache::PersistentCache;
pub use config::Settings;
pub use credentials::CredentialsCache;
pub use rate_limiter::RateLimiter;

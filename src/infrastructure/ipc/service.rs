//! D-Bus binding for `com.canonical.Thumbnailer` and its admin sibling (§6).

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, warn};
use zbus::interface;
use zbus::zvariant::OwnedFd;

use crate::application::services::{CacheBundle, Dispatcher};
use crate::domain::entities::{ArtKind, CacheId, TargetSize, ThumbnailRequest};
use crate::domain::errors::ServiceError;

pub const SERVICE_NAME: &str = "com.canonical.Thumbnailer";
pub const SERVICE_PATH: &str = "/com/canonical/Thumbnailer";

/// Wire-level error domain for this service (§6), distinct from the
/// generic `org.freedesktop.DBus.Error.*` domain `zbus::fdo::Error` uses.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "com.canonical.Thumbnailer.Error")]
pub enum ThumbnailerError {
    #[zbus(error)]
    ZBus(zbus::Error),
    Failed(String),
}

/// The data-path interface: `GetThumbnail`/`GetAlbumArt`/`GetArtistArt`.
pub struct ThumbnailerInterface {
    dispatcher: Arc<Dispatcher>,
}

impl ThumbnailerInterface {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    async fn reply_fd(&self, request: ThumbnailRequest, peer: &str) -> Result<OwnedFd, ThumbnailerError> {
        let bytes = self
            .dispatcher
            .dispatch(request, peer.to_string())
            .await
            .map_err(service_error_to_thumbnailer_error)?;

        write_anonymous_fd(&bytes).await.map_err(|err| {
            error!(%err, "failed to materialize reply file descriptor");
            ThumbnailerError::Failed(err.to_string())
        })
    }
}

#[interface(name = "com.canonical.Thumbnailer")]
impl ThumbnailerInterface {
    #[zbus(name = "GetThumbnail")]
    async fn get_thumbnail(
        &self,
        path: String,
        size: (i32, i32),
        #[zbus(header)] header: zbus::message::Header<'_>,
    ) -> Result<OwnedFd, ThumbnailerError> {
        let peer = sender_or_unknown(&header);
        let request = ThumbnailRequest::Thumbnail {
            path: PathBuf::from(path),
            size: clamp_size(size),
        };
        self.reply_fd(request, &peer).await
    }

    #[zbus(name = "GetAlbumArt")]
    async fn get_album_art(
        &self,
        artist: String,
        album: String,
        size: (i32, i32),
        #[zbus(header)] header: zbus::message::Header<'_>,
    ) -> Result<OwnedFd, ThumbnailerError> {
        let peer = sender_or_unknown(&header);
        let request = ThumbnailRequest::Art {
            kind: ArtKind::Album,
            artist,
            album,
            size: clamp_size(size),
        };
        self.reply_fd(request, &peer).await
    }

    #[zbus(name = "GetArtistArt")]
    async fn get_artist_art(
        &self,
        artist: String,
        album: String,
        size: (i32, i32),
        #[zbus(header)] header: zbus::message::Header<'_>,
    ) -> Result<OwnedFd, ThumbnailerError> {
        let peer = sender_or_unknown(&header);
        let request = ThumbnailRequest::Art {
            kind: ArtKind::Artist,
            artist,
            album,
            size: clamp_size(size),
        };
        self.reply_fd(request, &peer).await
    }
}

/// The admin interface: `Stats`/`ClearStats`/`Clear`/`Compact`/`Shutdown`.
pub struct AdminInterface {
    caches: CacheBundle,
    shutdown: Arc<tokio::sync::Notify>,
}

impl AdminInterface {
    #[must_use]
    pub fn new(caches: CacheBundle, shutdown: Arc<tokio::sync::Notify>) -> Self {
        Self { caches, shutdown }
    }

    fn instance(&self, cache_id: i32) -> Result<Arc<dyn crate::domain::ports::PersistentCachePort>, ThumbnailerError> {
        let id = CacheId::try_from(cache_id).map_err(|err| ThumbnailerError::Failed(err.to_string()))?;
        Ok(self.caches.instance(id).clone())
    }
}

#[interface(name = "com.canonical.Thumbnailer.AdminInterface")]
impl AdminInterface {
    async fn stats(&self) -> Result<String, ThumbnailerError> {
        let stats = self.caches.stats().await;
        serde_json::to_string(&stats).map_err(|err| ThumbnailerError::Failed(err.to_string()))
    }

    #[zbus(name = "ClearStats")]
    async fn clear_stats(&self, cache_id: i32) -> Result<(), ThumbnailerError> {
        self.instance(cache_id)?.clear_stats().await;
        Ok(())
    }

    async fn clear(&self, cache_id: i32) -> Result<(), ThumbnailerError> {
        self.instance(cache_id)?
            .clear()
            .await
            .map_err(|err| ThumbnailerError::Failed(err.to_string()))
    }

    async fn compact(&self, cache_id: i32) -> Result<(), ThumbnailerError> {
        self.instance(cache_id)?
            .compact()
            .await
            .map_err(|err| ThumbnailerError::Failed(err.to_string()))
    }

    async fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

fn clamp_size(size: (i32, i32)) -> TargetSize {
    TargetSize::new(size.0.max(0) as u32, size.1.max(0) as u32)
}

fn sender_or_unknown(header: &zbus::message::Header<'_>) -> String {
    header
        .sender()
        .map(|sender| sender.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn service_error_to_thumbnailer_error(err: ServiceError) -> ThumbnailerError {
    match err {
        ServiceError::PolicyDenied => ThumbnailerError::Failed("permission denied".to_string()),
        ServiceError::NotFound => ThumbnailerError::Failed("not found".to_string()),
        ServiceError::DecodeError(msg) => {
            ThumbnailerError::Failed(format!("cannot decode: {msg}"))
        }
        ServiceError::TransientNetwork(msg) => {
            ThumbnailerError::Failed(format!("network failure: {msg}"))
        }
        ServiceError::Internal(msg) => {
            warn!(error = %msg, "internal error surfaced to a caller");
            ThumbnailerError::Failed(format!("internal error: {msg}"))
        }
    }
}

async fn write_anonymous_fd(bytes: &[u8]) -> std::io::Result<OwnedFd> {
    use std::io::{Seek, SeekFrom, Write};

    let bytes = bytes.to_vec();
    let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
        let mut file = tempfile::tempfile()?;
        file.write_all(&bytes)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    })
    .await
    .map_err(std::io::Error::other)??;

    Ok(OwnedFd::from(std::os::fd::OwnedFd::from(file)))
}

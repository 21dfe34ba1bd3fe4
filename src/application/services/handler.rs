//! Request Handler (E): the per-request state machine (§4.5).

use std::io::Cursor;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, instrument, trace, warn};

use crate::domain::entities::{
    CacheKey, DerivedKey, FailureReason, FailureRecord, Fingerprint, HandlerState,
    ThumbnailRequest,
};
use crate::domain::errors::ServiceError;
use crate::domain::ports::{ArtSourcePort, CredentialsPort};

use super::cache_bundle::CacheBundle;
use crate::infrastructure::rate_limiter::RateLimiter;

/// JPEG quality used when re-encoding a post-processed thumbnail.
pub const THUMBNAIL_JPEG_QUALITY: u8 = 85;
/// Default failure-cache TTL fallback when `Settings` doesn't override it.
pub const DEFAULT_FAILURE_TTL: Duration = Duration::from_secs(60 * 60);

/// Timings collected over one handler's lifetime, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerTimings {
    pub queued: Option<Duration>,
    pub fetch: Option<Duration>,
    pub completion: Option<Duration>,
}

/// Coordinates one request through credential check, cache probes,
/// rate-limited fetch and post-processing (§4.5).
pub struct RequestHandler {
    pub request: ThumbnailRequest,
    pub peer: String,
    caches: CacheBundle,
    credentials: Arc<dyn CredentialsPort>,
    art_source: Arc<dyn ArtSourcePort>,
    download_limiter: Arc<RateLimiter>,
    extraction_limiter: Arc<RateLimiter>,
    failure_ttl: Duration,
    state: AtomicU8,
    timings: Mutex<HandlerTimings>,
    created_at: Instant,
}

impl RequestHandler {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request: ThumbnailRequest,
        peer: String,
        caches: CacheBundle,
        credentials: Arc<dyn CredentialsPort>,
        art_source: Arc<dyn ArtSourcePort>,
        download_limiter: Arc<RateLimiter>,
        extraction_limiter: Arc<RateLimiter>,
        failure_ttl: Duration,
    ) -> Self {
        Self {
            request,
            peer,
            caches,
            credentials,
            art_source,
            download_limiter,
            extraction_limiter,
            failure_ttl,
            state: AtomicU8::new(HandlerState::Created as u8),
            timings: Mutex::new(HandlerTimings::default()),
            created_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn timings(&self) -> HandlerTimings {
        *self.timings.lock()
    }

    #[must_use]
    pub fn state(&self) -> HandlerState {
        match self.state.load(Ordering::Relaxed) {
            0 => HandlerState::Created,
            1 => HandlerState::Queued,
            2 => HandlerState::CheckingCache,
            3 => HandlerState::AwaitingDownload,
            4 => HandlerState::AwaitingExtraction,
            5 => HandlerState::PostProcessing,
            6 => HandlerState::Finished,
            _ => HandlerState::Released,
        }
    }

    fn set_state(&self, state: HandlerState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Runs the handler to completion, returning the final JPEG bytes to
    /// hand to the IPC layer, or the typed error to surface as a bus error.
    #[instrument(skip(self), fields(peer = %self.peer))]
    pub async fn begin(&self, process_uid: u32) -> Result<Bytes, ServiceError> {
        self.set_state(HandlerState::Queued);
        let started = Instant::now();
        {
            let mut timings = self.timings.lock();
            timings.queued = Some(started.duration_since(self.created_at));
        }

        let result = self.run(process_uid).await;

        self.set_state(HandlerState::Finished);
        let elapsed = started.elapsed();
        {
            let mut timings = self.timings.lock();
            timings.completion = Some(elapsed);
        }
        trace!(elapsed = ?elapsed, ok = result.is_ok(), "handler finished");
        result
    }

    async fn run(&self, process_uid: u32) -> Result<Bytes, ServiceError> {
        self.set_state(HandlerState::CheckingCache);

        let creds = self.credentials.resolve(&self.peer).await?;
        if !creds.valid || creds.uid != process_uid {
            debug!(peer = %self.peer, "credentials policy denied request");
            return Err(ServiceError::PolicyDenied);
        }

        let target = self.request.size().clamp_to_max();
        let base_key = self.base_key().await?;
        let derived_key = DerivedKey::new(&base_key, target.width, target.height);

        if let Some(bytes) = self.caches.thumbnail.get(&derived_key.digest()).await? {
            trace!("thumbnail cache hit");
            return Ok(Bytes::from(bytes));
        }

        if let Some(record) = self.lookup_failure(&base_key).await? {
            debug!(reason = ?record.reason, "failure cache hit");
            return Err(failure_to_error(record.reason));
        }

        let source_bytes = if let Some(bytes) = self.caches.image.get(&base_key.digest()).await? {
            trace!("image cache hit");
            Bytes::from(bytes)
        } else {
            let fetch_started = Instant::now();
            let fetch_result = self.fetch(&base_key).await;
            {
                let mut timings = self.timings.lock();
                timings.fetch = Some(fetch_started.elapsed());
            }
            match fetch_result {
                Ok(bytes) => bytes,
                Err(err) => {
                    if let Some(reason) = err.failure_reason() {
                        if reason.is_cacheable() {
                            let record = FailureRecord::new(reason, self.failure_ttl);
                            if let Ok(encoded) = serde_json::to_vec(&record) {
                                if let Err(cache_err) =
                                    self.caches.failure.put(&base_key.digest(), encoded).await
                                {
                                    warn!(%cache_err, "failed to admit failure record");
                                }
                            }
                        }
                    }
                    return Err(err);
                }
            }
        };

        self.set_state(HandlerState::PostProcessing);
        let thumbnail = post_process(source_bytes, target).await?;

        if let Err(err) = self
            .caches
            .thumbnail
            .put(&derived_key.digest(), thumbnail.to_vec())
            .await
        {
            warn!(%err, "failed to admit rendered thumbnail into cache");
        }

        Ok(thumbnail)
    }

    async fn base_key(&self) -> Result<CacheKey, ServiceError> {
        match &self.request {
            ThumbnailRequest::Thumbnail { path, .. } => {
                let meta = tokio::fs::metadata(path).await.map_err(|err| {
                    if err.kind() == std::io::ErrorKind::NotFound {
                        ServiceError::NotFound
                    } else {
                        ServiceError::Internal(err.to_string())
                    }
                })?;
                Ok(CacheKey::for_local_file(path, Fingerprint::from_metadata(&meta)))
            }
            ThumbnailRequest::Art { artist, album, .. } => {
                Ok(CacheKey::for_remote_art(artist, album))
            }
        }
    }

    async fn lookup_failure(
        &self,
        base_key: &CacheKey,
    ) -> Result<Option<FailureRecord>, ServiceError> {
        let Some(bytes) = self.caches.failure.get(&base_key.digest()).await? else {
            return Ok(None);
        };
        let record: FailureRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(_) => return Ok(None),
        };
        if record.is_expired() {
            let _ = self.caches.failure.invalidate(&base_key.digest()).await;
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn fetch(&self, base_key: &CacheKey) -> Result<Bytes, ServiceError> {
        let _permit = match &self.request {
            ThumbnailRequest::Thumbnail { .. } => {
                self.set_state(HandlerState::AwaitingExtraction);
                self.extraction_limiter.acquire().await
            }
            ThumbnailRequest::Art { .. } => {
                self.set_state(HandlerState::AwaitingDownload);
                self.download_limiter.acquire().await
            }
        };

        let bytes = self.art_source.fetch(&self.request).await?;

        if let Err(err) = self.caches.image.put(&base_key.digest(), bytes.to_vec()).await {
            warn!(%err, "failed to admit fetched original into image cache");
        }

        Ok(bytes)
    }
}

fn failure_to_error(reason: FailureReason) -> ServiceError {
    match reason {
        FailureReason::NotFound => ServiceError::NotFound,
        FailureReason::DecodeError => ServiceError::DecodeError("cached decode failure".to_string()),
        FailureReason::PolicyDenied => ServiceError::PolicyDenied,
        FailureReason::TransientNetwork => {
            ServiceError::TransientNetwork("cached transient failure".to_string())
        }
    }
}

async fn post_process(
    bytes: Bytes,
    target: crate::domain::entities::TargetSize,
) -> Result<Bytes, ServiceError> {
    tokio::task::spawn_blocking(move || post_process_blocking(&bytes, target))
        .await
        .map_err(|err| ServiceError::Internal(format!("post-processing task panicked: {err}")))?
}

fn post_process_blocking(
    bytes: &[u8],
    target: crate::domain::entities::TargetSize,
) -> Result<Bytes, ServiceError> {
    let mut decoder = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| ServiceError::DecodeError(err.to_string()))?
        .into_decoder()
        .map_err(|err| ServiceError::DecodeError(err.to_string()))?;

    let orientation = decoder
        .orientation()
        .unwrap_or(image::metadata::Orientation::NoTransforms);

    let mut image = image::DynamicImage::from_decoder(decoder)
        .map_err(|err| ServiceError::DecodeError(err.to_string()))?;
    image.apply_orientation(orientation);

    let (orig_w, orig_h) = (image.width(), image.height());
    let (w, h) = target.resolve_against(orig_w, orig_h);
    let resized = if (w, h) == (orig_w, orig_h) {
        image
    } else {
        image.resize_exact(w, h, image::imageops::FilterType::Lanczos3)
    };

    let mut buf = Cursor::new(Vec::new());
    resized
        .write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(
            &mut buf,
            THUMBNAIL_JPEG_QUALITY,
        ))
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

    Ok(Bytes::from(buf.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::TargetSize;
    use crate::domain::errors::ArtSourceError;
    use crate::infrastructure::cache::PersistentCache;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct StaticArtSource(Bytes);

    #[async_trait::async_trait]
    impl ArtSourcePort for StaticArtSource {
        async fn fetch(&self, _request: &ThumbnailRequest) -> Result<Bytes, ArtSourceError> {
            Ok(self.0.clone())
        }
    }

    struct AlwaysNotFound;

    #[async_trait::async_trait]
    impl ArtSourcePort for AlwaysNotFound {
        async fn fetch(&self, _request: &ThumbnailRequest) -> Result<Bytes, ArtSourceError> {
            Err(ArtSourceError::NotFound)
        }
    }

    struct StaticCreds(crate::domain::entities::Credentials);

    #[async_trait::async_trait]
    impl CredentialsPort for StaticCreds {
        async fn resolve(
            &self,
            _peer: &str,
        ) -> Result<crate::domain::entities::Credentials, crate::domain::errors::CredentialsError>
        {
            Ok(self.0.clone())
        }
    }

    fn sample_png() -> Bytes {
        let img = image::DynamicImage::new_rgb8(640, 480);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        Bytes::from(buf.into_inner())
    }

    async fn make_caches() -> (CacheBundle, TempDir) {
        let dir = TempDir::new().unwrap();
        let image = Arc::new(
            PersistentCache::open(dir.path().join("image"), 16 * 1024 * 1024)
                .await
                .unwrap(),
        );
        let thumbnail = Arc::new(
            PersistentCache::open(dir.path().join("thumbnail"), 16 * 1024 * 1024)
                .await
                .unwrap(),
        );
        let failure = Arc::new(
            PersistentCache::open(dir.path().join("failure"), 1024 * 1024)
                .await
                .unwrap(),
        );
        (
            CacheBundle {
                image,
                thumbnail,
                failure,
            },
            dir,
        )
    }

    #[tokio::test]
    async fn successful_remote_art_request_produces_jpeg() {
        let (caches, _dir) = make_caches().await;
        let handler = RequestHandler::new(
            ThumbnailRequest::Art {
                kind: crate::domain::entities::ArtKind::Album,
                artist: "artist".to_string(),
                album: "album".to_string(),
                size: TargetSize::new(48, 48),
            },
            ":1.1".to_string(),
            caches,
            Arc::new(StaticCreds(crate::domain::entities::Credentials::unconfined(1000))),
            Arc::new(StaticArtSource(sample_png())),
            Arc::new(RateLimiter::new("download", 1)),
            Arc::new(RateLimiter::new("extraction", 1)),
            DEFAULT_FAILURE_TTL,
        );

        let bytes = handler.begin(1000).await.unwrap();
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn mismatched_uid_is_policy_denied() {
        let (caches, _dir) = make_caches().await;
        let handler = RequestHandler::new(
            ThumbnailRequest::Art {
                kind: crate::domain::entities::ArtKind::Album,
                artist: "artist".to_string(),
                album: "album".to_string(),
                size: TargetSize::new(48, 48),
            },
            ":1.1".to_string(),
            caches,
            Arc::new(StaticCreds(crate::domain::entities::Credentials::unconfined(1000))),
            Arc::new(StaticArtSource(sample_png())),
            Arc::new(RateLimiter::new("download", 1)),
            Arc::new(RateLimiter::new("extraction", 1)),
            DEFAULT_FAILURE_TTL,
        );

        let err = handler.begin(2000).await.unwrap_err();
        assert!(matches!(err, ServiceError::PolicyDenied));
    }

    #[tokio::test]
    async fn not_found_is_cached_and_returned_on_retry() {
        let (caches, _dir) = make_caches().await;
        let make_handler = |caches: CacheBundle| {
            RequestHandler::new(
                ThumbnailRequest::Art {
                    kind: crate::domain::entities::ArtKind::Album,
                    artist: "test".to_string(),
                    album: "test".to_string(),
                    size: TargetSize::new(48, 48),
                },
                ":1.1".to_string(),
                caches,
                Arc::new(StaticCreds(crate::domain::entities::Credentials::unconfined(1000))),
                Arc::new(AlwaysNotFound),
                Arc::new(RateLimiter::new("download", 1)),
                Arc::new(RateLimiter::new("extraction", 1)),
                DEFAULT_FAILURE_TTL,
            )
        };

        let handler = make_handler(caches.clone());
        let err = handler.begin(1000).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound));

        assert!(caches
            .failure
            .contains(
                &CacheKey::for_remote_art("test", "test").digest()
            )
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn missing_local_file_is_not_found() {
        let (caches, _dir) = make_caches().await;
        let handler = RequestHandler::new(
            ThumbnailRequest::Thumbnail {
                path: PathBuf::from("/no/such/file.jpg"),
                size: TargetSize::original(),
            },
            ":1.1".to_string(),
            caches,
            Arc::new(StaticCreds(crate::domain::entities::Credentials::unconfined(1000))),
            Arc::new(AlwaysNotFound),
            Arc::new(RateLimiter::new("download", 1)),
            Arc::new(RateLimiter::new("extraction", 1)),
            DEFAULT_FAILURE_TTL,
        );

        let err = handler.begin(1000).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound));
    }
}

//! Dispatcher (F): accepts requests, constructs handlers, chains same-key
//! handlers FIFO, and tracks in-flight count for the inactivity monitor (§4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace};

use crate::domain::entities::ThumbnailRequest;
use crate::domain::errors::ServiceError;
use crate::domain::ports::{ArtSourcePort, CredentialsPort};

use super::cache_bundle::CacheBundle;
use super::handler::RequestHandler;
use super::inactivity::InactivityMonitor;
use crate::infrastructure::rate_limiter::RateLimiter;

type HandlerId = u64;
type SharedResult = Result<Bytes, ServiceError>;
/// A oneshot receiver wrapped as a `Shared` future so multiple chained
/// successors can all await the same predecessor completion (§9).
type SharedCompletion = futures_util::future::Shared<
    futures_util::future::Map<oneshot::Receiver<SharedResult>, fn(Result<SharedResult, oneshot::error::RecvError>) -> SharedResult>,
>;

struct ChainEntry {
    id: HandlerId,
    completion: SharedCompletion,
}

struct State {
    chains: HashMap<String, Vec<ChainEntry>>,
    in_flight: u64,
}

/// Owns every live [`RequestHandler`], chains handlers sharing a base key,
/// and signals the [`InactivityMonitor`] as the in-flight count changes.
pub struct Dispatcher {
    caches: CacheBundle,
    credentials: Arc<dyn CredentialsPort>,
    art_source: Arc<dyn ArtSourcePort>,
    download_limiter: Arc<RateLimiter>,
    extraction_limiter: Arc<RateLimiter>,
    failure_ttl: std::time::Duration,
    process_uid: u32,
    inactivity: Arc<InactivityMonitor>,
    next_id: AtomicU64,
    state: Mutex<State>,
}

impl Dispatcher {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        caches: CacheBundle,
        credentials: Arc<dyn CredentialsPort>,
        art_source: Arc<dyn ArtSourcePort>,
        download_limiter: Arc<RateLimiter>,
        extraction_limiter: Arc<RateLimiter>,
        failure_ttl: std::time::Duration,
        process_uid: u32,
        inactivity: Arc<InactivityMonitor>,
    ) -> Self {
        Self {
            caches,
            credentials,
            art_source,
            download_limiter,
            extraction_limiter,
            failure_ttl,
            process_uid,
            inactivity,
            next_id: AtomicU64::new(0),
            state: Mutex::new(State {
                chains: HashMap::new(),
                in_flight: 0,
            }),
        }
    }

    #[must_use]
    pub async fn in_flight(&self) -> u64 {
        self.state.lock().await.in_flight
    }

    /// Dispatches `request`, chaining it behind any in-flight handler for
    /// the same base key, and returns the final result.
    pub async fn dispatch(&self, request: ThumbnailRequest, peer: String) -> SharedResult {
        let key = chain_key(&request);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel::<SharedResult>();
        let completion: SharedCompletion = rx
            .map(resolve_recv as fn(Result<SharedResult, oneshot::error::RecvError>) -> SharedResult)
            .shared();

        // Reading the current chain tail and appending this handler's own
        // completion slot must happen under one lock: otherwise two
        // concurrent arrivals for the same key could both observe an empty
        // chain and run their fetch concurrently instead of coalescing.
        let predecessor = {
            let mut state = self.state.lock().await;
            if state.in_flight == 0 {
                self.inactivity.end_inactivity();
            }
            state.in_flight += 1;
            let chain = state.chains.entry(key.clone()).or_default();
            let predecessor = chain.last().map(|entry| entry.completion.clone());
            chain.push(ChainEntry {
                id,
                completion: completion.clone(),
            });
            predecessor
        };

        if let Some(predecessor) = predecessor {
            trace!(key = %key, "chaining behind in-flight handler for the same key");
            let _ = predecessor.await;
        }

        let handler = RequestHandler::new(
            request,
            peer,
            self.caches.clone(),
            self.credentials.clone(),
            self.art_source.clone(),
            self.download_limiter.clone(),
            self.extraction_limiter.clone(),
            self.failure_ttl,
        );

        let result = handler.begin(self.process_uid).await;
        let _ = tx.send(clone_result(&result));

        self.complete(&key, id).await;
        result
    }

    async fn complete(&self, key: &str, id: HandlerId) {
        let mut state = self.state.lock().await;
        if let Some(chain) = state.chains.get_mut(key) {
            chain.retain(|entry| entry.id != id);
            if chain.is_empty() {
                state.chains.remove(key);
            }
        }
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            debug!("dispatcher has gone idle");
            self.inactivity.start_inactivity();
        }
    }
}

fn chain_key(request: &ThumbnailRequest) -> String {
    match request {
        ThumbnailRequest::Thumbnail { path, .. } => format!("path:{}", path.display()),
        ThumbnailRequest::Art { artist, album, .. } => format!("art:{artist}\u{0}{album}"),
    }
}

fn resolve_recv(result: Result<SharedResult, oneshot::error::RecvError>) -> SharedResult {
    result.unwrap_or_else(|_| Err(ServiceError::Internal("predecessor handler dropped".to_string())))
}

fn clone_result(result: &SharedResult) -> SharedResult {
    match result {
        Ok(bytes) => Ok(bytes.clone()),
        Err(err) => Err(ServiceError::Internal(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ArtKind, Credentials, TargetSize};
    use crate::domain::errors::{ArtSourceError, CredentialsError};
    use crate::infrastructure::cache::PersistentCache;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct CountingArtSource {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ArtSourcePort for CountingArtSource {
        async fn fetch(&self, _request: &ThumbnailRequest) -> Result<Bytes, ArtSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let img = image::DynamicImage::new_rgb8(8, 8);
            let mut buf = std::io::Cursor::new(Vec::new());
            img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
            Ok(Bytes::from(buf.into_inner()))
        }
    }

    struct AnyUserCreds;

    #[async_trait::async_trait]
    impl CredentialsPort for AnyUserCreds {
        async fn resolve(&self, _peer: &str) -> Result<Credentials, CredentialsError> {
            Ok(Credentials::unconfined(1000))
        }
    }

    async fn make_dispatcher(art_source: Arc<dyn ArtSourcePort>) -> (Dispatcher, TempDir) {
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
        let dispatcher = Dispatcher::new(
            CacheBundle {
                image,
                thumbnail,
                failure,
            },
            Arc::new(AnyUserCreds),
            art_source,
            Arc::new(RateLimiter::new("download", 2)),
            Arc::new(RateLimiter::new("extraction", 2)),
            std::time::Duration::from_secs(60),
            1000,
            Arc::new(InactivityMonitor::new(std::time::Duration::from_secs(3600))),
        );
        (dispatcher, dir)
    }

    #[tokio::test]
    async fn concurrent_same_key_requests_coalesce_to_one_fetch() {
        let art_source = Arc::new(CountingArtSource {
            calls: AtomicUsize::new(0),
        });
        let (dispatcher, _dir) = make_dispatcher(art_source.clone()).await;
        let dispatcher = Arc::new(dispatcher);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .dispatch(
                        ThumbnailRequest::Art {
                            kind: ArtKind::Album,
                            artist: "test_threads".to_string(),
                            album: "TEST_0".to_string(),
                            size: TargetSize::new(48, 48),
                        },
                        ":1.1".to_string(),
                    )
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(art_source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.in_flight().await, 0);
    }
}

//! Art Source Adapter (D): local extraction and remote download behind one port.

mod local_extractor;
mod remote_downloader;

pub use local_extractor::LocalExtractor;
pub use remote_downloader::RemoteDownloader;

use bytes::Bytes;

use crate::domain::entities::ThumbnailRequest;
use crate::domain::errors::ArtSourceError;
use crate::domain::ports::ArtSourcePort;

/// Routes a request to the local extractor or the remote downloader
/// depending on its kind, presenting both behind the uniform
/// `start(key) -> {ok, not_found, error}` contract.
pub struct CombinedArtSource {
    local: LocalExtractor,
    remote: RemoteDownloader,
}

impl CombinedArtSource {
    #[must_use]
    pub fn new(local: LocalExtractor, remote: RemoteDownloader) -> Self {
        Self { local, remote }
    }
}

#[async_trait::async_trait]
impl ArtSourcePort for CombinedArtSource {
    async fn fetch(&self, request: &ThumbnailRequest) -> Result<Bytes, ArtSourceError> {
        match request {
            ThumbnailRequest::Thumbnail { path, .. } => self.local.extract(path).await,
            ThumbnailRequest::Art {
                kind,
                artist,
                album,
                ..
            } => self.remote.download(*kind, artist, album).await,
        }
    }
}

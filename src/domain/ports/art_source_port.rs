//! Port for the Art Source Adapter (D): local extraction and remote download.

use bytes::Bytes;

use crate::domain::entities::ThumbnailRequest;
use crate::domain::errors::ArtSourceError;

/// Uniform `start(key) -> {ok, not_found, error}` contract (§4.4): `Ok`
/// carries the raw source bytes, [`ArtSourceError::NotFound`] and the other
/// variants cover the negative outcomes.
#[async_trait::async_trait]
pub trait ArtSourcePort: Send + Sync {
    async fn fetch(&self, request: &ThumbnailRequest) -> Result<Bytes, ArtSourceError>;
}

//! Extracts embedded cover art from a local media file (§4.4).
//!
//! The original daemon shelled out to a per-mimetype extraction helper; no
//! such external collaborator is available here, so extraction decodes the
//! file in-process with the `image` crate inside a `spawn_blocking` task
//! gated by the extraction [`RateLimiter`].

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::domain::errors::ArtSourceError;
use crate::infrastructure::rate_limiter::RateLimiter;

pub struct LocalExtractor {
    limiter: Arc<RateLimiter>,
}

impl LocalExtractor {
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    /// Decodes `path`, corrects EXIF orientation and returns re-encoded PNG
    /// bytes suitable for feeding into the post-processing resize step.
    pub async fn extract(&self, path: &Path) -> Result<Bytes, ArtSourceError> {
        let _permit = self.limiter.acquire().await;

        let path_buf = path.to_path_buf();
        let display = path_buf.display().to_string();
        let result = tokio::task::spawn_blocking(move || decode_and_normalize(&path_buf))
            .await
            .map_err(|err| ArtSourceError::Internal(format!("extraction task panicked: {err}")))?;

        match &result {
            Ok(_) => debug!(path = %display, "extracted embedded art"),
            Err(err) => warn!(path = %display, %err, "local art extraction failed"),
        }
        result
    }
}

fn decode_and_normalize(path: &Path) -> Result<Bytes, ArtSourceError> {
    let file = std::fs::File::open(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => ArtSourceError::NotFound,
        _ => ArtSourceError::Internal(err.to_string()),
    })?;
    let reader = std::io::BufReader::new(file);

    let mut decoder = image::ImageReader::new(reader)
        .with_guessed_format()
        .map_err(|err| ArtSourceError::Internal(err.to_string()))?
        .into_decoder()
        .map_err(|err| ArtSourceError::DecodeError(err.to_string()))?;

    let orientation = decoder
        .orientation()
        .unwrap_or(image::metadata::Orientation::NoTransforms);

    let mut image = image::DynamicImage::from_decoder(decoder)
        .map_err(|err| ArtSourceError::DecodeError(err.to_string()))?;
    image.apply_orientation(orientation);

    let mut buf = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|err| ArtSourceError::Internal(err.to_string()))?;

    Ok(Bytes::from(buf.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let extractor = LocalExtractor::new(Arc::new(RateLimiter::new("extraction", 1)));
        let err = extractor
            .extract(Path::new("/nonexistent/path/does/not/exist.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtSourceError::NotFound));
    }

    #[tokio::test]
    async fn decodes_a_real_image() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cover.png");
        let img = image::DynamicImage::new_rgb8(4, 4);
        img.save(&path).unwrap();

        let extractor = LocalExtractor::new(Arc::new(RateLimiter::new("extraction", 1)));
        let bytes = extractor.extract(&path).await.unwrap();
        assert!(!bytes.is_empty());
    }
}

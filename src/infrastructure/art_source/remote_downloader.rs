//! Downloads remote cover/artist art from the configured art providers (§4.4).
//!
//! Every non-2xx reply was treated identically by the original client; here
//! a `404` is distinguished from every other failure so that only a
//! confirmed "no art exists" result is cached (§7, §9).

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::domain::entities::ArtKind;
use crate::domain::errors::ArtSourceError;
use crate::infrastructure::config::Settings;
use crate::infrastructure::rate_limiter::RateLimiter;

pub struct RemoteDownloader {
    client: reqwest::Client,
    settings: Arc<Settings>,
    limiter: Arc<RateLimiter>,
}

impl RemoteDownloader {
    pub fn new(settings: Arc<Settings>, limiter: Arc<RateLimiter>) -> Result<Self, ArtSourceError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|err| ArtSourceError::Internal(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            settings,
            limiter,
        })
    }

    pub async fn download(
        &self,
        kind: ArtKind,
        artist: &str,
        album: &str,
    ) -> Result<Bytes, ArtSourceError> {
        let _permit = self.limiter.acquire().await;

        let size = kind.remote_size();
        let base = match kind {
            ArtKind::Album => &self.settings.ubuntu_api_root,
            ArtKind::Artist => &self.settings.lastfm_api_root,
        };

        let mut request = self
            .client
            .get(base.as_str())
            .query(&[("artist", artist), ("album", album)])
            .query(&[("size", size)]);

        if let Some(api_key) = &self.settings.api_key {
            request = request.query(&[("api_key", api_key.as_str())]);
        }

        let response = request.send().await.map_err(classify_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(artist, album, "remote art provider reported not found");
            return Err(ArtSourceError::NotFound);
        }
        if !status.is_success() {
            warn!(%status, artist, album, "remote art provider returned an error");
            return Err(ArtSourceError::TransientNetwork(format!(
                "HTTP {status}"
            )));
        }

        response
            .bytes()
            .await
            .map_err(|err| ArtSourceError::TransientNetwork(err.to_string()))
    }
}

fn classify_transport_error(err: reqwest::Error) -> ArtSourceError {
    if err.is_timeout() || err.is_connect() {
        ArtSourceError::TransientNetwork(err.to_string())
    } else {
        ArtSourceError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Arc<Settings> {
        Arc::new(Settings {
            cache_root: std::path::PathBuf::from("/tmp/thumbnailer-test-cache"),
            max_idle: std::time::Duration::from_secs(45),
            lastfm_api_root: "http://127.0.0.1:1/lastfm".to_string(),
            ubuntu_api_root: "http://127.0.0.1:1/ubuntu".to_string(),
            api_key: None,
            max_downloads: 2,
            max_extractions: 2,
            image_cache_bytes: 1024,
            thumbnail_cache_bytes: 1024,
            failure_cache_bytes: 1024,
            failure_ttl: std::time::Duration::from_secs(60),
        })
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        let limiter = Arc::new(RateLimiter::new("download", 1));
        let downloader = RemoteDownloader::new(test_settings(), limiter).unwrap();
        let err = downloader
            .download(ArtKind::Album, "artist", "album")
            .await
            .unwrap_err();
        assert!(matches!(err, ArtSourceError::TransientNetwork(_)));
    }
}

//! Daemon configuration, read once at startup from the environment (§6, §10).

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use thiserror::Error;
use tracing::warn;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "canonical";
const APP_NAME: &str = "thumbnailer";

const DEFAULT_MAX_IDLE_MS: u64 = 45_000;
const DEFAULT_MAX_DOWNLOADS: usize = 2;
/// Upstream identified a bug in a media-extraction library that surfaces
/// only above 2 concurrent extractions on constrained hardware; the safe
/// default is capped at 2 rather than the full `available_parallelism`.
const MAX_EXTRACTIONS_HARDWARE_CAP: usize = 2;
const DEFAULT_IMAGE_CACHE_BYTES: u64 = 200 * 1024 * 1024;
const DEFAULT_THUMBNAIL_CACHE_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_FAILURE_CACHE_BYTES: u64 = 8 * 1024 * 1024;
const DEFAULT_FAILURE_TTL_SECS: u64 = 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to determine a cache directory; set XDG_CACHE_HOME or HOME")]
    CacheDirNotFound,

    #[error("environment variable {name} has an invalid value {value:?}: {reason}")]
    InvalidEnvVar {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Resolved daemon configuration.
///
/// Constructed once in `main` via [`Settings::from_env`]; every field is
/// immutable for the process lifetime, so it is shared behind an `Arc`
/// rather than re-read per request.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_root: PathBuf,
    pub max_idle: Duration,
    pub lastfm_api_root: String,
    pub ubuntu_api_root: String,
    pub api_key: Option<String>,
    pub max_downloads: usize,
    pub max_extractions: usize,
    pub image_cache_bytes: u64,
    pub thumbnail_cache_bytes: u64,
    pub failure_cache_bytes: u64,
    pub failure_ttl: Duration,
}

impl Settings {
    /// Reads configuration from the process environment, falling back to
    /// `XDG_CACHE_HOME`/`~/.cache` via [`ProjectDirs`] for the cache root.
    ///
    /// # Errors
    /// Returns an error if the cache directory cannot be determined, or if
    /// a numeric environment variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cache_root = match std::env::var_os("XDG_CACHE_HOME") {
            Some(dir) => PathBuf::from(dir).join("thumbnailer"),
            None => ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
                .map(|dirs| dirs.cache_dir().to_path_buf())
                .ok_or(ConfigError::CacheDirNotFound)?,
        };

        let max_idle = parse_millis_env(
            "THUMBNAILER_MAX_IDLE",
            Duration::from_millis(DEFAULT_MAX_IDLE_MS),
        )?;
        let max_downloads = parse_usize_env("THUMBNAILER_MAX_DOWNLOADS", DEFAULT_MAX_DOWNLOADS)?;
        let default_max_extractions = std::thread::available_parallelism()
            .map(|n| n.get().min(MAX_EXTRACTIONS_HARDWARE_CAP))
            .unwrap_or(1);
        let max_extractions =
            parse_usize_env("THUMBNAILER_MAX_EXTRACTIONS", default_max_extractions)?
                .max(1);
        let image_cache_bytes =
            parse_u64_env("THUMBNAILER_IMAGE_CACHE_CAPACITY", DEFAULT_IMAGE_CACHE_BYTES)?;
        let thumbnail_cache_bytes = parse_u64_env(
            "THUMBNAILER_THUMBNAIL_CACHE_CAPACITY",
            DEFAULT_THUMBNAIL_CACHE_BYTES,
        )?;
        let failure_cache_bytes = parse_u64_env(
            "THUMBNAILER_FAILURE_CACHE_CAPACITY",
            DEFAULT_FAILURE_CACHE_BYTES,
        )?;
        let failure_ttl = parse_secs_env(
            "THUMBNAILER_FAILURE_TTL_SECS",
            Duration::from_secs(DEFAULT_FAILURE_TTL_SECS),
        )?;

        Ok(Self {
            cache_root,
            max_idle,
            lastfm_api_root: std::env::var("THUMBNAILER_LASTFM_APIROOT")
                .unwrap_or_else(|_| "https://ws.audioscrobbler.com/2.0/".to_string()),
            ubuntu_api_root: std::env::var("THUMBNAILER_UBUNTU_APIROOT")
                .unwrap_or_else(|_| "https://art.ubuntu.com/".to_string()),
            api_key: std::env::var("THUMBNAILER_API_KEY").ok(),
            max_downloads,
            max_extractions,
            image_cache_bytes,
            thumbnail_cache_bytes,
            failure_cache_bytes,
            failure_ttl,
        })
    }

    #[must_use]
    pub fn image_cache_dir(&self) -> PathBuf {
        self.cache_root.join("image")
    }

    #[must_use]
    pub fn thumbnail_cache_dir(&self) -> PathBuf {
        self.cache_root.join("thumbnail")
    }

    #[must_use]
    pub fn failure_cache_dir(&self) -> PathBuf {
        self.cache_root.join("failure")
    }
}

fn parse_usize_env(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    parse_env(name, default, str::parse)
}

fn parse_u64_env(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    parse_env(name, default, str::parse)
}

fn parse_secs_env(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_env(name, default.as_secs(), str::parse).map(Duration::from_secs)
}

fn parse_millis_env(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    #[allow(clippy::cast_possible_truncation)]
    let default_ms = default.as_millis() as u64;
    parse_env(name, default_ms, str::parse).map(Duration::from_millis)
}

fn parse_env<T, F>(name: &'static str, default: T, parse: F) -> Result<T, ConfigError>
where
    F: FnOnce(&str) -> Result<T, std::num::ParseIntError>,
{
    match std::env::var(name) {
        Ok(value) => parse(&value).map_err(|err| ConfigError::InvalidEnvVar {
            name,
            value,
            reason: err.to_string(),
        }),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(std::env::VarError::NotUnicode(value)) => {
            warn!(name, "environment variable is not valid unicode, using default");
            Err(ConfigError::InvalidEnvVar {
                name,
                value: value.to_string_lossy().to_string(),
                reason: "not valid unicode".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        let settings = Settings {
            cache_root: PathBuf::from("/tmp/thumbnailer-test"),
            max_idle: Duration::from_millis(DEFAULT_MAX_IDLE_MS),
            lastfm_api_root: "https://ws.audioscrobbler.com/2.0/".to_string(),
            ubuntu_api_root: "https://art.ubuntu.com/".to_string(),
            api_key: None,
            max_downloads: DEFAULT_MAX_DOWNLOADS,
            max_extractions: MAX_EXTRACTIONS_HARDWARE_CAP,
            image_cache_bytes: DEFAULT_IMAGE_CACHE_BYTES,
            thumbnail_cache_bytes: DEFAULT_THUMBNAIL_CACHE_BYTES,
            failure_cache_bytes: DEFAULT_FAILURE_CACHE_BYTES,
            failure_ttl: Duration::from_secs(DEFAULT_FAILURE_TTL_SECS),
        };
        assert_eq!(
            settings.image_cache_dir(),
            PathBuf::from("/tmp/thumbnailer-test/image")
        );
    }

    #[test]
    fn rejects_unparseable_numeric_env_value() {
        let name = "THUMBNAILER_TEST_BAD_VAR";
        // SAFETY: this test owns `name`; no other test reads or writes it.
        unsafe {
            std::env::set_var(name, "not-a-number");
        }
        let result = parse_usize_env(name, 4);
        // SAFETY: same as above.
        unsafe {
            std::env::remove_var(name);
        }
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }
}

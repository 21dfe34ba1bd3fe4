use std::process::ExitCode;
use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use thumbnailer_service::application::services::{CacheBundle, Dispatcher, InactivityMonitor};
use thumbnailer_service::infrastructure::art_source::{LocalExtractor, RemoteDownloader};
use thumbnailer_service::infrastructure::ipc::{AdminInterface, ThumbnailerInterface, SERVICE_NAME, SERVICE_PATH};
use thumbnailer_service::infrastructure::{CombinedArtSource, CredentialsCache, PersistentCache, RateLimiter, Settings};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_target(true))
        .init();
}

/// Builds every collaborator and registers the IPC objects on the bus.
/// Returns the live connection (held for the process lifetime) and a
/// `Notify` that fires once on either idle timeout or an admin `Shutdown()`.
async fn build_daemon(
    settings: Arc<Settings>,
) -> Result<(zbus::Connection, Arc<tokio::sync::Notify>)> {
    let image = Arc::new(
        PersistentCache::open_with_entry_cap(
            settings.image_cache_dir(),
            settings.image_cache_bytes,
            settings.image_cache_bytes / 8,
        )
        .await
        .wrap_err("failed to open the image cache")?,
    );
    let thumbnail = Arc::new(
        PersistentCache::open(settings.thumbnail_cache_dir(), settings.thumbnail_cache_bytes)
            .await
            .wrap_err("failed to open the thumbnail cache")?,
    );
    let failure = Arc::new(
        PersistentCache::open(settings.failure_cache_dir(), settings.failure_cache_bytes)
            .await
            .wrap_err("failed to open the failure cache")?,
    );
    let caches = CacheBundle {
        image,
        thumbnail,
        failure,
    };

    let download_limiter = Arc::new(RateLimiter::new("download", settings.max_downloads));
    let extraction_limiter = Arc::new(RateLimiter::new("extraction", settings.max_extractions));

    let connection = zbus::Connection::session()
        .await
        .wrap_err("failed to connect to the session bus")?;

    let credentials: Arc<dyn thumbnailer_service::domain::ports::CredentialsPort> =
        Arc::new(CredentialsCache::new(connection.clone()));

    let local = LocalExtractor::new(extraction_limiter.clone());
    let remote = RemoteDownloader::new(settings.clone(), download_limiter.clone())
        .wrap_err("failed to build the remote art HTTP client")?;
    let art_source: Arc<dyn thumbnailer_service::domain::ports::ArtSourcePort> =
        Arc::new(CombinedArtSource::new(local, remote));

    let inactivity = Arc::new(InactivityMonitor::new(settings.max_idle));
    inactivity.start_inactivity();

    // SAFETY: getuid(2) takes no arguments and never fails.
    let process_uid = unsafe { libc::getuid() };

    let dispatcher = Arc::new(Dispatcher::new(
        caches.clone(),
        credentials,
        art_source,
        download_limiter,
        extraction_limiter,
        settings.failure_ttl,
        process_uid,
        inactivity.clone(),
    ));

    let shutdown = Arc::new(tokio::sync::Notify::new());
    {
        let shutdown = shutdown.clone();
        let inactivity = inactivity.clone();
        tokio::spawn(async move {
            inactivity.wait_for_shutdown().await;
            shutdown.notify_waiters();
        });
    }

    connection
        .object_server()
        .at(SERVICE_PATH, ThumbnailerInterface::new(dispatcher))
        .await
        .wrap_err("failed to register the thumbnailer interface")?;
    connection
        .object_server()
        .at(SERVICE_PATH, AdminInterface::new(caches, shutdown.clone()))
        .await
        .wrap_err("failed to register the admin interface")?;

    connection
        .request_name(SERVICE_NAME)
        .await
        .wrap_err("failed to acquire the well-known bus name")?;

    info!(name = SERVICE_NAME, path = SERVICE_PATH, "service registered on the session bus");

    Ok((connection, shutdown))
}

async fn run() -> Result<()> {
    let settings = Arc::new(Settings::from_env().wrap_err("failed to load configuration")?);
    info!(version = thumbnailer_service::VERSION, cache_root = %settings.cache_root.display(), "starting thumbnailer-service");

    let (connection, shutdown) = build_daemon(settings).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::select! {
        () = shutdown.notified() => {
            info!("idle timeout or admin shutdown request, exiting");
        }
        result = ctrl_c => {
            result.wrap_err("failed to listen for ctrl-c")?;
            info!("received interrupt, shutting down");
        }
    }

    drop(connection);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    color_eyre::install().expect("color_eyre installs exactly once");
    init_logging();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

//! thumbnailer-service - a local D-Bus daemon that caches thumbnails and
//! cover/artist art for other desktop clients.
//!
//! This crate implements a clean-architecture daemon: domain entities and
//! ports, infrastructure adapters (disk cache, D-Bus, HTTP, image decoding),
//! and application services that orchestrate them (§2).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing orchestration services.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "thumbnailer-service";

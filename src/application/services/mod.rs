//! Application services: the Dispatcher, Request Handler and Inactivity Monitor.

mod cache_bundle;
mod dispatcher;
mod handler;
mod inactivity;

pub use cache_bundle::CacheBundle;
pub use dispatcher::Dispatcher;
pub use handler::{RequestHandler, HandlerTimings, DEFAULT_FAILURE_TTL, THUMBNAIL_JPEG_QUALITY};
pub use inactivity::InactivityMonitor;

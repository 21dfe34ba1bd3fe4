//! D-Bus IPC surface: the data-path and admin interfaces (§6).

mod service;

pub use service::{AdminInterface, ThumbnailerError, ThumbnailerInterface, SERVICE_NAME, SERVICE_PATH};

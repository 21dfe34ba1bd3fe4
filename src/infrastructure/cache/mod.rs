//! Disk-backed persistent cache infrastructure (A-image / A-thumb / A-fail).

mod persistent_cache;

pub use persistent_cache::{instance_dir, PersistentCache};

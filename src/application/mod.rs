//! Application layer: orchestration services built on the domain ports.

pub mod services;

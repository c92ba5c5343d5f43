//! Tracing initialization
//!
//! Installs a global `tracing` subscriber filtered by `RUST_LOG`, with either
//! human-readable or JSON output.

mod init;

pub use init::{default_filter, init_telemetry, shutdown_telemetry};

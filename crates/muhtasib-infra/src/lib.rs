//! Muhtasib Infrastructure Library
//!
//! Shared infrastructure used by the binaries:
//! - Telemetry initialization (tracing subscriber)

pub mod telemetry;

pub use telemetry::{init_telemetry, shutdown_telemetry};

//! Muhtasib Core Library
//!
//! This crate provides the domain models, error taxonomy, and configuration
//! shared by every Muhtasib component (staging, scanning, fetching, pipeline, CLI).

pub mod config;
pub mod constants;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{Config, LogFormat, ScanAccess};
pub use error::{ArtifactError, ErrorMetadata, FetchStage, LogLevel};
pub use models::{
    Provider, ScanReport, ScanResult, ScanStatus, SourceDescriptor, StagedArtifact, Verdict,
};

//! Domain models for artifacts moving through the scan pipeline.

pub mod scan;
pub mod source;

pub use scan::{ScanReport, ScanResult, ScanStatus, StagedArtifact, Verdict};
pub use source::{Provider, SourceDescriptor};

//! Error types module
//!
//! Per-artifact failures are values, not panics: every stage of the attachment
//! pipeline reports one of the `ArtifactError` variants, and the pipeline turns
//! them into a result record. Setup failures (staging directory, provider
//! credentials) live in the pipeline crate and abort a whole batch instead.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like malformed user input
    Debug,
    /// Warning level - for recoverable issues like a stale staged file
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata describing how an error should be reported to the caller
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "FETCH_FAILED")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same artifact later might succeed
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the user
    fn suggested_action(&self) -> Option<&'static str>;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

/// The step of a fetch that failed.
///
/// Provider fetches go through several independent calls; reporting the stage lets
/// the caller tell "no such message" apart from "message has no attachment" and
/// from a transient network failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStage {
    /// Plain HTTP GET of a direct URL
    Request,
    /// Provider message lookup
    MessageLookup,
    /// Picking the attachment id out of the message's part list
    AttachmentResolution,
    /// Provider attachment download
    PayloadRetrieval,
    /// Transport-encoding decode of the payload
    Decode,
    /// Writing bytes to the staging path
    Write,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchStage::Request => "request",
            FetchStage::MessageLookup => "message lookup",
            FetchStage::AttachmentResolution => "attachment resolution",
            FetchStage::PayloadRetrieval => "payload retrieval",
            FetchStage::Decode => "decode",
            FetchStage::Write => "write",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Fetch failed during {stage}: {reason}")]
    FetchFailed { stage: FetchStage, reason: String },

    #[error("Staging failed: {0}")]
    StagingFailed(String),

    #[error("Scanner not available: {0}")]
    ScannerUnavailable(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Cleanup failed: {0}")]
    CleanupFailed(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl ArtifactError {
    pub fn fetch(stage: FetchStage, reason: impl Into<String>) -> Self {
        ArtifactError::FetchFailed {
            stage,
            reason: reason.into(),
        }
    }

    /// Fetch stage, when the error came from a fetcher
    pub fn stage(&self) -> Option<FetchStage> {
        match self {
            ArtifactError::FetchFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Static metadata for each variant: (error_code, recoverable, suggested_action, log_level).
fn artifact_error_static_metadata(
    err: &ArtifactError,
) -> (&'static str, bool, Option<&'static str>, LogLevel) {
    match err {
        ArtifactError::InvalidSource(_) => (
            "INVALID_SOURCE",
            false,
            Some("Check the URL, or use the provider-specific link for webmail attachments"),
            LogLevel::Debug,
        ),
        ArtifactError::FetchFailed { .. } => (
            "FETCH_FAILED",
            true,
            Some("Verify the source is reachable and retry"),
            LogLevel::Warn,
        ),
        ArtifactError::StagingFailed(_) => (
            "STAGING_FAILED",
            true,
            Some("Check whether local antivirus quarantines files in the staging directory"),
            LogLevel::Error,
        ),
        ArtifactError::ScannerUnavailable(_) => (
            "SCANNER_UNAVAILABLE",
            true,
            Some("Ensure the ClamAV daemon is running and reachable"),
            LogLevel::Error,
        ),
        ArtifactError::ScanFailed(_) => (
            "SCAN_FAILED",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        ArtifactError::CleanupFailed(_) => (
            "CLEANUP_FAILED",
            false,
            Some("Remove the stale staged file manually"),
            LogLevel::Warn,
        ),
        ArtifactError::Cancelled(_) => ("CANCELLED", true, None, LogLevel::Debug),
    }
}

impl ErrorMetadata for ArtifactError {
    fn error_code(&self) -> &'static str {
        artifact_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        artifact_error_static_metadata(self).1
    }

    fn suggested_action(&self) -> Option<&'static str> {
        artifact_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        artifact_error_static_metadata(self).3
    }
}

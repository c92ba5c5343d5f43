use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::source::SourceDescriptor;
use crate::error::{ArtifactError, ErrorMetadata};

/// Bytes committed to the staging directory for one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedArtifact {
    pub path: PathBuf,
    pub origin: SourceDescriptor,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Classification returned by the scan daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Clean,
    Infected(String),
    ScannerUnavailable,
    ScanError(String),
}

impl Verdict {
    /// True when the daemon actually evaluated the file
    pub fn is_definite(&self) -> bool {
        matches!(self, Verdict::Clean | Verdict::Infected(_))
    }

    pub fn summary(&self) -> String {
        match self {
            Verdict::Clean => "No malware detected".to_string(),
            Verdict::Infected(signature) => signature.clone(),
            Verdict::ScannerUnavailable => "Scanner not available".to_string(),
            Verdict::ScanError(message) => message.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Clean,
    Infected,
    Error,
    /// Scan verdict is valid but the staged file could not be removed
    Warning,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Clean => "clean",
            ScanStatus::Infected => "infected",
            ScanStatus::Error => "error",
            ScanStatus::Warning => "warning",
        }
    }
}

/// One record per input descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub source: SourceDescriptor,
    pub staged_path: Option<PathBuf>,
    pub status: ScanStatus,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ScanResult {
    /// Result for a definite verdict whose staged file was removed
    pub fn from_verdict(source: SourceDescriptor, staged_path: PathBuf, verdict: Verdict) -> Self {
        let status = match verdict {
            Verdict::Clean => ScanStatus::Clean,
            Verdict::Infected(_) => ScanStatus::Infected,
            Verdict::ScannerUnavailable | Verdict::ScanError(_) => ScanStatus::Error,
        };
        Self {
            source,
            staged_path: Some(staged_path),
            status,
            details: verdict.summary(),
            verdict: Some(verdict),
            error_code: None,
        }
    }

    pub fn from_error(
        source: SourceDescriptor,
        staged_path: Option<PathBuf>,
        error: &ArtifactError,
    ) -> Self {
        Self {
            source,
            staged_path,
            status: ScanStatus::Error,
            details: error.to_string(),
            verdict: None,
            error_code: Some(error.error_code().to_string()),
        }
    }

    /// Scan succeeded, cleanup did not. The verdict is kept and the cleanup
    /// problem is appended to the details.
    pub fn cleanup_warning(
        source: SourceDescriptor,
        staged_path: PathBuf,
        verdict: Verdict,
        cleanup: &ArtifactError,
    ) -> Self {
        let details = format!("{}; {}", verdict.summary(), cleanup);
        Self {
            source,
            staged_path: Some(staged_path),
            status: ScanStatus::Warning,
            details,
            verdict: Some(verdict),
            error_code: Some(cleanup.error_code().to_string()),
        }
    }
}

/// Aggregate of a batch run, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub results: Vec<ScanResult>,
}

impl ScanReport {
    pub fn new(results: Vec<ScanResult>) -> Self {
        Self { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn count(&self, status: ScanStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn has_infections(&self) -> bool {
        self.results.iter().any(|r| {
            r.status == ScanStatus::Infected
                || matches!(r.verdict, Some(Verdict::Infected(_)))
        })
    }

    /// Plain-text rendering, one block per artifact
    pub fn render_text(&self) -> String {
        let mut out = String::from("Attachment Scan Results:\n\n");
        for result in &self.results {
            let path = result
                .staged_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "N/A".to_string());
            let _ = writeln!(out, "Source: {}", result.source);
            let _ = writeln!(out, "File Path: {}", path);
            let _ = writeln!(out, "Status: {}", result.status.as_str());
            let _ = writeln!(out, "Details: {}\n", result.details);
        }
        out
    }
}

use muhtasib_core::{ErrorMetadata, LogLevel};
use muhtasib_sources::SourceError;
use muhtasib_storage::StagingError;
use thiserror::Error;

/// Batch-level failures. Any of these aborts the whole run before an artifact is
/// touched; per-artifact problems are reported in the result records instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to create staging directory: {0}")]
    Staging(#[from] StagingError),

    #[error("No fetcher configured for {0} sources")]
    MissingFetcher(&'static str),

    #[error("Setup failed for {fetcher} sources: {source}")]
    Setup {
        fetcher: &'static str,
        #[source]
        source: SourceError,
    },
}

impl ErrorMetadata for PipelineError {
    fn error_code(&self) -> &'static str {
        match self {
            PipelineError::Staging(_) => "STAGING_SETUP_FAILED",
            PipelineError::MissingFetcher(_) => "MISSING_FETCHER",
            PipelineError::Setup { .. } => "SOURCE_SETUP_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, PipelineError::MissingFetcher(_))
    }

    fn suggested_action(&self) -> Option<&'static str> {
        match self {
            PipelineError::Staging(_) => Some("Check STAGING_DIR exists and is writable"),
            PipelineError::MissingFetcher(_) => {
                Some("Set GMAIL_ACCESS_TOKEN or OUTLOOK_ACCESS_TOKEN for provider links")
            }
            PipelineError::Setup { .. } => Some("Refresh the provider access token"),
        }
    }

    fn log_level(&self) -> LogLevel {
        LogLevel::Error
    }
}

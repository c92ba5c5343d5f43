use thiserror::Error;

/// Setup-level failures. Unlike per-artifact [`muhtasib_core::ArtifactError`]s these
/// abort a whole batch.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("No bearer token available: {0}")]
    MissingToken(String),

    #[error("Invalid API base URL '{0}'")]
    InvalidBaseUrl(String),
}

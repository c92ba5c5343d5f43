use std::io;
use std::path::PathBuf;

use muhtasib_core::{ArtifactError, FetchStage};
use thiserror::Error;

/// Staging operation errors
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Failed to create staging directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Path {0} lies outside the staging directory")]
    OutsideRoot(PathBuf),

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Staged file {path} not usable: {reason}")]
    NotVisible { path: PathBuf, reason: String },

    #[error("Failed to delete {path}: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for staging operations
pub type StagingResult<T> = Result<T, StagingError>;

impl From<StagingError> for ArtifactError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::WriteFailed { .. } => ArtifactError::fetch(FetchStage::Write, err.to_string()),
            StagingError::DeleteFailed { .. } => ArtifactError::CleanupFailed(err.to_string()),
            StagingError::NotVisible { .. }
            | StagingError::OutsideRoot(_)
            | StagingError::CreateDir { .. }
            | StagingError::Io(_) => ArtifactError::StagingFailed(err.to_string()),
        }
    }
}

use std::path::Path;
use std::time::Duration;

use tokio::fs;

use crate::error::{StagingError, StagingResult};

/// Bounded re-check of a freshly written file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(200),
        }
    }
}

/// Confirm that `path` exists as a non-empty regular file, returning its size.
///
/// A successful write is not proof: filesystem flush latency or an on-access scanner
/// can hide or quarantine the file before the daemon sees it. Missing and zero-byte
/// files are re-checked `policy.attempts` times with a fixed delay before giving up.
pub async fn verify_staged(path: &Path, policy: VerifyPolicy) -> StagingResult<u64> {
    let attempts = policy.attempts.max(1);
    let mut reason = String::new();

    for attempt in 1..=attempts {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                if attempt > 1 {
                    tracing::debug!(path = %path.display(), attempt, "Staged file became visible");
                }
                return Ok(meta.len());
            }
            Ok(meta) if !meta.is_file() => reason = "not a regular file".to_string(),
            Ok(_) => reason = "file is empty".to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                reason = "file does not exist".to_string()
            }
            Err(e) => reason = e.to_string(),
        }

        if attempt < attempts {
            tracing::debug!(
                path = %path.display(),
                attempt,
                reason = %reason,
                "Staged file not ready, retrying"
            );
            tokio::time::sleep(policy.delay).await;
        }
    }

    tracing::warn!(path = %path.display(), attempts, reason = %reason, "Staged file verification failed");
    Err(StagingError::NotVisible {
        path: path.to_path_buf(),
        reason: format!("{} after {} attempts", reason, attempts),
    })
}

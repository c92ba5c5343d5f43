use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{StagingError, StagingResult};

/// Sibling path used while bytes are still being written
fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.partial", name, Uuid::new_v4().simple()))
}

/// Write `data` to `dest` without ever exposing a partially written file at `dest`.
///
/// Bytes go to a hidden sibling first, are synced, then renamed into place. On any
/// failure the sibling is removed and `dest` is left untouched.
pub async fn write_atomic(dest: &Path, data: &[u8]) -> StagingResult<u64> {
    let tmp = partial_path(dest);
    let start = std::time::Instant::now();

    let result: std::io::Result<()> = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, dest).await
    }
    .await;

    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&tmp).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %tmp.display(), error = %cleanup, "Failed to remove partial file");
            }
        }
        return Err(StagingError::WriteFailed {
            path: dest.to_path_buf(),
            source: e,
        });
    }

    tracing::debug!(
        path = %dest.display(),
        size_bytes = data.len(),
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Staged file written"
    );

    Ok(data.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_bytes_and_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("payload.bin");
        let data = vec![0u8, 1, 2, 255, 254];

        let written = write_atomic(&dest, &data).await.unwrap();
        assert_eq!(written, 5);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_destination_absent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing-dir").join("payload.bin");

        let err = write_atomic(&dest, b"abc").await.unwrap_err();
        assert!(matches!(err, StagingError::WriteFailed { .. }));
        assert!(!dest.exists());
    }
}

use std::io;
use std::path::{Component, Path, PathBuf};

use muhtasib_core::constants::STAGING_DIR_PREFIX;
use tempfile::TempDir;
use tokio::fs;
use uuid::Uuid;

use crate::error::{StagingError, StagingResult};

const MAX_SUFFIX_LEN: usize = 64;
const MAX_ALLOCATE_ATTEMPTS: usize = 8;

/// Scoped staging directory.
///
/// The directory is created by [`TempStore::new`] and removed, with anything left in
/// it, when the store is dropped or [`TempStore::close`]d. Paths handed out by
/// [`TempStore::allocate`] always lie inside [`TempStore::root`].
#[derive(Debug)]
pub struct TempStore {
    dir: Option<TempDir>,
    root: PathBuf,
}

impl TempStore {
    /// Create a staging directory with a random name under `parent`
    /// (the system temp directory when `None`).
    pub fn new(parent: Option<&Path>) -> StagingResult<Self> {
        let parent = parent
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);

        std::fs::create_dir_all(&parent).map_err(|e| StagingError::CreateDir {
            path: parent.clone(),
            source: e,
        })?;

        let dir = tempfile::Builder::new()
            .prefix(STAGING_DIR_PREFIX)
            .tempdir_in(&parent)
            .map_err(|e| StagingError::CreateDir {
                path: parent.clone(),
                source: e,
            })?;

        // Canonical so containment checks agree with paths the OS reports back
        let root = dir
            .path()
            .canonicalize()
            .map_err(|e| StagingError::CreateDir {
                path: dir.path().to_path_buf(),
                source: e,
            })?;

        tracing::debug!(root = %root.display(), "Staging directory created");

        Ok(Self {
            dir: Some(dir),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return a fresh path inside the root that does not exist yet.
    ///
    /// `suffix_hint` (typically the original file name) is sanitized to a single
    /// safe path component and appended after the random part.
    pub fn allocate(&self, suffix_hint: Option<&str>) -> StagingResult<PathBuf> {
        let suffix = suffix_hint.map(sanitize_suffix).unwrap_or_default();

        for _ in 0..MAX_ALLOCATE_ATTEMPTS {
            let name = if suffix.is_empty() {
                Uuid::new_v4().simple().to_string()
            } else {
                format!("{}_{}", Uuid::new_v4().simple(), suffix)
            };
            let path = self.root.join(name);
            match std::fs::symlink_metadata(&path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(path),
                Err(e) => return Err(StagingError::Io(e)),
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "Staging name collision, retrying");
                }
            }
        }

        Err(StagingError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not allocate a unique staging path",
        )))
    }

    /// Whether `path` lies inside the staging root
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
            && path.components().all(|c| !matches!(c, Component::ParentDir))
            && path != self.root
    }

    /// Delete a staged file. A file that is already gone counts as released.
    pub async fn release(&self, path: &Path) -> StagingResult<()> {
        if !self.contains(path) {
            return Err(StagingError::OutsideRoot(path.to_path_buf()));
        }

        match fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Staged file released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to release staged file");
                Err(StagingError::DeleteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }

    /// Entries currently present in the staging root
    pub async fn entries(&self) -> StagingResult<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.path());
        }
        entries.sort();
        Ok(entries)
    }

    /// Remove the staging directory now, reporting any failure.
    ///
    /// Dropping the store does the same but can only log errors.
    pub fn close(mut self) -> StagingResult<()> {
        match self.dir.take() {
            Some(dir) => {
                tracing::debug!(root = %self.root.display(), "Removing staging directory");
                dir.close().map_err(StagingError::Io)
            }
            None => Ok(()),
        }
    }
}

impl Drop for TempStore {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                tracing::warn!(
                    root = %self.root.display(),
                    error = %e,
                    "Failed to remove staging directory"
                );
            }
        }
    }
}

/// Reduce a file-name hint to one safe path component
fn sanitize_suffix(hint: &str) -> String {
    let name = hint.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    let mut out: String = trimmed.chars().take(MAX_SUFFIX_LEN).collect();
    if out.chars().all(|c| c == '_' || c == '.') {
        out.clear();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn sanitize_suffix_strips_paths_and_specials() {
        assert_eq!(sanitize_suffix("invoice.pdf"), "invoice.pdf");
        assert_eq!(sanitize_suffix("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_suffix("C:\\temp\\a b.doc"), "a_b.doc");
        assert_eq!(sanitize_suffix("..."), "");
        assert_eq!(sanitize_suffix("???"), "");
        assert_eq!(sanitize_suffix(&"x".repeat(200)).len(), MAX_SUFFIX_LEN);
    }

    #[test]
    fn allocate_stays_inside_root() {
        let parent = tempfile::tempdir().unwrap();
        let store = TempStore::new(Some(parent.path())).unwrap();

        let path = store.allocate(Some("../escape.exe")).unwrap();
        assert!(path.starts_with(store.root()));
        assert!(store.contains(&path));
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("_escape.exe"));
        assert!(!path.exists());
    }

    #[test]
    fn allocate_twice_gives_distinct_paths() {
        let store = TempStore::new(None).unwrap();
        let a = store.allocate(None).unwrap();
        let b = store.allocate(None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn concurrent_allocations_are_distinct() {
        let store = Arc::new(TempStore::new(None).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| store.allocate(Some("a.bin")).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for path in handle.join().unwrap() {
                assert!(seen.insert(path), "duplicate staging path allocated");
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[tokio::test]
    async fn release_removes_file_and_tolerates_missing() {
        let store = TempStore::new(None).unwrap();
        let path = store.allocate(None).unwrap();
        tokio::fs::write(&path, b"data").await.unwrap();

        store.release(&path).await.unwrap();
        assert!(!path.exists());
        // Second release of the same path is a no-op
        store.release(&path).await.unwrap();
    }

    #[tokio::test]
    async fn release_outside_root_is_refused() {
        let store = TempStore::new(None).unwrap();
        let outside = tempfile::NamedTempFile::new().unwrap();
        let err = store.release(outside.path()).await.unwrap_err();
        assert!(matches!(err, StagingError::OutsideRoot(_)));
        assert!(outside.path().exists());

        let sneaky = store.root().join("..").join("x");
        assert!(!store.contains(&sneaky));
    }

    #[tokio::test]
    async fn release_failure_is_reported() {
        let store = TempStore::new(None).unwrap();
        let path = store.allocate(None).unwrap();
        // remove_file on a directory fails with something other than NotFound
        tokio::fs::create_dir(&path).await.unwrap();

        let err = store.release(&path).await.unwrap_err();
        assert!(matches!(err, StagingError::DeleteFailed { .. }));
    }

    #[tokio::test]
    async fn drop_removes_directory_with_contents() {
        let store = TempStore::new(None).unwrap();
        let root = store.root().to_path_buf();
        let path = store.allocate(Some("left.txt")).unwrap();
        tokio::fs::write(&path, b"stale").await.unwrap();
        assert_eq!(store.entries().await.unwrap(), vec![path]);

        drop(store);
        assert!(!root.exists());
    }

    #[test]
    fn close_reports_success() {
        let store = TempStore::new(None).unwrap();
        let root = store.root().to_path_buf();
        store.close().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn roots_are_unique_per_instance() {
        let parent = tempfile::tempdir().unwrap();
        let a = TempStore::new(Some(parent.path())).unwrap();
        let b = TempStore::new(Some(parent.path())).unwrap();
        assert_ne!(a.root(), b.root());
        assert!(a
            .root()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(STAGING_DIR_PREFIX));
    }
}

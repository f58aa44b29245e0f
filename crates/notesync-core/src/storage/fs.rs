//! Filesystem-backed content artifacts.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{artifact_path, validate_artifact_path, ContentStore};
use crate::{Error, Result};

/// Stores each note body as `<root>/<id>.note`.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    /// Create a store rooted at `root`. The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_artifact_path(path)?))
    }

    /// Write the body for `note_id` while keeping the previous artifact
    /// aside, so the write can be undone if the row referencing it fails.
    pub async fn write_pending(&self, note_id: &str, bytes: &[u8]) -> Result<PendingArtifact> {
        let relative = artifact_path(note_id)?;
        let full_path = self.resolve(&relative)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let staging = full_path.with_extension("note.tmp");
        tokio::fs::write(&staging, bytes).await.map_err(|error| {
            Error::Storage(format!("write {} failed: {error}", staging.display()))
        })?;

        let backup_path = full_path.with_extension("note.bak");
        let backup = match tokio::fs::rename(&full_path, &backup_path).await {
            Ok(()) => Some(backup_path),
            Err(error) if error.kind() == ErrorKind::NotFound => None,
            Err(error) => {
                discard(&staging).await;
                return Err(Error::Storage(format!(
                    "backup of {} failed: {error}",
                    full_path.display()
                )));
            }
        };

        if let Err(error) = tokio::fs::rename(&staging, &full_path).await {
            discard(&staging).await;
            if let Some(backup) = &backup {
                if let Err(restore_error) = tokio::fs::rename(backup, &full_path).await {
                    tracing::error!(
                        "Failed to restore {}: {restore_error}",
                        full_path.display()
                    );
                }
            }
            return Err(Error::Storage(format!(
                "rename into {} failed: {error}",
                full_path.display()
            )));
        }

        Ok(PendingArtifact {
            path: relative,
            full_path,
            backup,
        })
    }
}

/// A freshly written artifact whose previous body is still recoverable.
#[derive(Debug)]
#[must_use = "keep or revert the artifact once the row is stored"]
pub struct PendingArtifact {
    path: String,
    full_path: PathBuf,
    backup: Option<PathBuf>,
}

impl PendingArtifact {
    /// Artifact path relative to the store root
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Drop the previous body.
    pub async fn keep(self) {
        if let Some(backup) = &self.backup {
            discard(backup).await;
        }
    }

    /// Put the previous body back, or remove the artifact if there was none.
    pub async fn revert(self) -> Result<()> {
        match &self.backup {
            Some(backup) => tokio::fs::rename(backup, &self.full_path).await?,
            None => match tokio::fs::remove_file(&self.full_path).await {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            },
        }
        Ok(())
    }
}

async fn discard(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        if error.kind() != ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {error}", path.display());
        }
    }
}

impl ContentStore for FsContentStore {
    async fn write(&self, note_id: &str, bytes: &[u8]) -> Result<String> {
        let relative = artifact_path(note_id)?;
        let full_path = self.resolve(&relative)?;
        tokio::fs::create_dir_all(&self.root).await?;

        // Write to a sidecar first so a failed write never truncates the previous body.
        let staging = full_path.with_extension("note.tmp");
        tokio::fs::write(&staging, bytes).await.map_err(|error| {
            Error::Storage(format!("write {} failed: {error}", staging.display()))
        })?;
        tokio::fs::rename(&staging, &full_path).await.map_err(|error| {
            Error::Storage(format!("rename into {} failed: {error}", full_path.display()))
        })?;

        Ok(relative)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve(path)?;
        match tokio::fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("content artifact {path}")))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve(path)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_read_and_overwrite() {
        let dir = tempdir().unwrap();
        let store = FsContentStore::new(dir.path().join("notes"));

        let path = store.write("ABC123", b"first").await.unwrap();
        assert_eq!(path, "abc123.note");
        let again = store.write("abc123", b"second").await.unwrap();
        assert_eq!(path, again);

        assert_eq!(store.read(&path).await.unwrap(), b"second");
        let entries = std::fs::read_dir(store.root()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn pending_write_can_be_kept_or_reverted() {
        let dir = tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        let path = store.write("n1", b"first").await.unwrap();

        let pending = store.write_pending("n1", b"second").await.unwrap();
        assert_eq!(pending.path(), path);
        assert_eq!(store.read(&path).await.unwrap(), b"second");
        pending.revert().await.unwrap();
        assert_eq!(store.read(&path).await.unwrap(), b"first");

        store.write_pending("n1", b"third").await.unwrap().keep().await;
        assert_eq!(store.read(&path).await.unwrap(), b"third");
        let entries = std::fs::read_dir(store.root()).unwrap().count();
        assert_eq!(entries, 1);

        let fresh = store.write_pending("n2", b"new").await.unwrap();
        let fresh_path = fresh.path().to_string();
        fresh.revert().await.unwrap();
        assert!(matches!(store.read(&fresh_path).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_read_reports_missing() {
        let dir = tempdir().unwrap();
        let store = FsContentStore::new(dir.path());

        let path = store.write("n1", b"body").await.unwrap();
        store.delete(&path).await.unwrap();
        store.delete(&path).await.unwrap();

        assert!(matches!(store.read(&path).await, Err(Error::NotFound(_))));
        assert_eq!(store.read_text(&path).await.unwrap(), "");
    }
}

//! Content artifact storage.
//!
//! Note bodies live outside the database in artifacts keyed by note id. The
//! artifact path is a deterministic function of the id, so rewriting a body is
//! an overwrite, never an append.

mod fs;
mod memory;

pub use fs::{FsContentStore, PendingArtifact};
pub use memory::MemoryContentStore;

use crate::{Error, Result};

/// File extension used for note body artifacts.
pub const CONTENT_EXTENSION: &str = "note";

/// Content artifact operations shared by the client and the server.
#[allow(async_fn_in_trait)]
pub trait ContentStore {
    /// Write the body for `note_id`, replacing any previous artifact, and
    /// return the artifact path.
    async fn write(&self, note_id: &str, bytes: &[u8]) -> Result<String>;

    /// Read an artifact by path.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete an artifact by path. Deleting a missing artifact succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Read an artifact as UTF-8 text, treating a missing artifact as empty.
    async fn read_text(&self, path: &str) -> Result<String> {
        match self.read(path).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map_err(|error| Error::Storage(format!("artifact {path} is not UTF-8: {error}"))),
            Err(Error::NotFound(_)) => {
                tracing::warn!("Content artifact {path} is missing; treating body as empty");
                Ok(String::new())
            }
            Err(error) => Err(error),
        }
    }
}

/// Deterministic artifact path for a note id.
pub fn artifact_path(note_id: &str) -> Result<String> {
    let key = normalize_artifact_key(note_id)?;
    Ok(format!("{key}.{CONTENT_EXTENSION}"))
}

fn normalize_artifact_key(note_id: &str) -> Result<String> {
    let key = note_id.trim().to_ascii_lowercase();
    if key.is_empty() {
        return Err(Error::InvalidInput(
            "Content artifact key cannot be empty".to_string(),
        ));
    }
    if key.contains("..") || key.contains('/') || key.contains('\\') {
        return Err(Error::InvalidInput(format!(
            "Content artifact key must not contain path segments: {key}"
        )));
    }
    Ok(key)
}

/// Reject artifact paths that could escape the store root.
fn validate_artifact_path(path: &str) -> Result<&str> {
    let path = path.trim();
    if path.is_empty() || path.contains("..") || path.starts_with('/') || path.contains('\\') {
        return Err(Error::InvalidInput(format!(
            "Invalid content artifact path: {path}"
        )));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_path_is_deterministic_and_lowercase() {
        assert_eq!(artifact_path("ABC123").unwrap(), "abc123.note");
        assert_eq!(
            artifact_path("abc123").unwrap(),
            artifact_path(" ABC123 ").unwrap()
        );
    }

    #[test]
    fn artifact_path_rejects_traversal() {
        assert!(artifact_path("").is_err());
        assert!(artifact_path("../etc").is_err());
        assert!(artifact_path("a/b").is_err());
    }

    #[test]
    fn validate_artifact_path_rejects_absolute_paths() {
        assert!(validate_artifact_path("/etc/passwd").is_err());
        assert!(validate_artifact_path("x/../../y").is_err());
        assert_eq!(validate_artifact_path(" a.note ").unwrap(), "a.note");
    }
}

use std::io;

use notesync_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] notesync_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No note content provided")]
    EmptyContent,
    #[error("Edited note content cannot be empty")]
    EmptyEditedContent,
    #[error("Note ID cannot be empty")]
    EmptyNoteId,
    #[error("Note not found for id/prefix: {0}")]
    NoteNotFound(String),
    #[error("{0}")]
    AmbiguousNoteId(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("No token provided; pass --token or pipe it on stdin")]
    MissingToken,
    #[error("Sync is not configured. Set NOTESYNC_API_URL to enable `notesync sync`.")]
    SyncNotConfigured,
    #[error("Not signed in. Run `notesync login --user <ID> --token <TOKEN>` first.")]
    NotSignedIn,
    #[error("Sync skipped: {0}")]
    SyncSkipped(String),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
}

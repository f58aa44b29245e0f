//! Local store service: note rows plus their content artifacts.
//!
//! Every user-facing mutation goes through the same change tracking: bump
//! `updated_at` and set `needs_sync`. The reconciliation engine is the only
//! other writer and works on the locked connection directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::db::{
    Database, LibSqlNoteRepository, LibSqlSessionRepository, NoteRepository, SessionRepository,
};
use crate::models::{normalize_title, Note, NoteEdit, NoteId, Session};
use crate::storage::ContentStore;
use crate::sync::lifecycle::{next_state, LifecycleEvent};
use crate::util::bump_timestamp;
use crate::{Error, NoteState, Result};

/// Thread-safe handle to the local database and content artifacts.
#[derive(Clone)]
pub struct NoteStore<C> {
    db: Arc<Mutex<Database>>,
    content: C,
}

impl<C: ContentStore> NoteStore<C> {
    /// Open the store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>, content: C) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            content,
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory(content: C) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            content,
        })
    }

    /// Content artifact store backing note bodies.
    pub const fn content(&self) -> &C {
        &self.content
    }

    /// Exclusive access to the database for multi-statement transactions.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().await
    }

    /// Create a note. The body artifact is written before the row.
    pub async fn create_note(&self, title: &str, body: &str, is_draft: bool) -> Result<Note> {
        let mut note = Note::new(title, String::new(), is_draft);
        note.content_path = self
            .content
            .write(&note.id.as_str(), body.as_bytes())
            .await?;

        let db = self.db.lock().await;
        let repo = LibSqlNoteRepository::new(db.connection());
        if let Err(error) = repo.insert(&note).await {
            drop(db);
            if let Err(cleanup) = self.content.delete(&note.content_path).await {
                tracing::warn!(
                    "Failed to remove orphaned artifact {}: {cleanup}",
                    note.content_path
                );
            }
            return Err(error);
        }

        tracing::debug!("Created note {}", note.id);
        Ok(note)
    }

    /// Apply a user edit. Unchanged fields do not count as a mutation.
    pub async fn update_note(&self, id: &NoteId, edit: &NoteEdit) -> Result<Note> {
        let mut note = self.require_note(id).await?;
        if edit.is_empty() {
            return Ok(note);
        }

        let mut changed = false;
        if let Some(title) = edit.title.as_deref().map(normalize_title) {
            if title != note.title {
                note.title = title;
                changed = true;
            }
        }
        if let Some(is_draft) = edit.is_draft {
            if is_draft != note.is_draft {
                note.is_draft = is_draft;
                changed = true;
            }
        }
        if let Some(body) = edit.content.as_deref() {
            if body != self.read_body(&note).await? {
                note.content_path = self.content.write(&note.id.as_str(), body.as_bytes()).await?;
                changed = true;
            }
        }

        if !changed {
            return Ok(note);
        }

        note.needs_sync = true;
        note.updated_at = bump_timestamp(note.updated_at);

        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).save(&note).await?;
        Ok(note)
    }

    /// Move a note between `Active` and `Trashed`.
    pub(crate) async fn transition(&self, id: &NoteId, event: LifecycleEvent) -> Result<Note> {
        let mut note = self.require_note(id).await?;
        match next_state(note.state(), event)? {
            Some(state) => note.temp_delete = state == NoteState::Trashed,
            None => {
                return Err(Error::InvalidInput(
                    "purging goes through the deletion lifecycle".to_string(),
                ))
            }
        }

        note.needs_sync = true;
        note.updated_at = bump_timestamp(note.updated_at);

        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).save(&note).await?;
        Ok(note)
    }

    /// Physically remove a note: row first, then its artifact.
    pub(crate) async fn remove_note(&self, note: &Note) -> Result<bool> {
        let removed = {
            let db = self.db.lock().await;
            LibSqlNoteRepository::new(db.connection())
                .remove(&note.id)
                .await?
        };
        self.content.delete(&note.content_path).await?;
        Ok(removed)
    }

    /// Fetch a note by local id, in any lifecycle state.
    pub async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).get(id).await
    }

    /// Fetch a note by the id the remote store knows it under.
    pub async fn get_note_by_server_id(&self, server_id: &str) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .get_by_server_id(server_id)
            .await
    }

    async fn require_note(&self, id: &NoteId) -> Result<Note> {
        self.get_note(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Read a note's body from its artifact.
    pub async fn read_body(&self, note: &Note) -> Result<String> {
        self.content.read_text(&note.content_path).await
    }

    /// List active notes newest-first.
    pub async fn list_notes(&self, limit: usize, offset: usize) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .list_active(limit, offset)
            .await
    }

    /// List trashed notes newest-first.
    pub async fn list_trash(&self) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).list_trashed().await
    }

    /// Notes whose local state has not been pushed.
    pub async fn notes_needing_sync(&self) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .list_needing_sync()
            .await
    }

    pub async fn count_needing_sync(&self) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .count_needing_sync()
            .await
    }

    /// Trashed notes last touched before `cutoff` (Unix ms).
    pub async fn list_trashed_before(&self, cutoff: i64) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .list_trashed_before(cutoff)
            .await
    }

    /// Record a successful single-note push; see
    /// [`NoteRepository::mark_synced_if_unchanged`].
    pub(crate) async fn mark_synced_if_unchanged(
        &self,
        id: &NoteId,
        expected_updated_at: i64,
        server_id: Option<&str>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .mark_synced_if_unchanged(id, expected_updated_at, server_id)
            .await
    }

    /// Store a new session. The sync cursor starts empty, forcing a full fetch.
    pub async fn save_session(&self, user_id: &str, token: &str) -> Result<Session> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .save(user_id, token)
            .await
    }

    pub async fn current_session(&self) -> Result<Option<Session>> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection()).load().await
    }

    pub async fn clear_session(&self) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection()).clear().await
    }

    /// Sync cursor of the current session (Unix ms).
    pub async fn last_sync_time(&self) -> Result<Option<i64>> {
        Ok(self
            .current_session()
            .await?
            .and_then(|session| session.last_sync_time))
    }

    pub async fn set_last_sync_time(&self, last_sync_time: Option<i64>) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .set_last_sync_time(last_sync_time)
            .await
    }
}

fn is_corrupted_db_error(error: &Error) -> bool {
    error
        .to_string()
        .to_ascii_lowercase()
        .contains("file is not a database")
}

fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
    if db_path.exists() {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let file_name = db_path
            .file_name()
            .map_or_else(|| "notesync.db".into(), |name| name.to_string_lossy());
        let backup_path = db_path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));

        std::fs::rename(db_path, &backup_path)?;
        tracing::warn!(
            "Moved corrupted local DB file from {} to {}",
            db_path.display(),
            backup_path.display()
        );
    }

    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
        return Ok(());
    };
    // WAL and shared-memory sidecars
    for suffix in ["-wal", "-shm"] {
        let sidecar = parent.join(format!("{base_name}{suffix}"));
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
            tracing::warn!("Removed stale database file {}", sidecar.display());
        }
    }

    Ok(())
}

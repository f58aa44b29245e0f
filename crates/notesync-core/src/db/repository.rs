//! Note repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use crate::error::{Error, Result};
use crate::models::{normalize_remote_id, Note, NoteId};
use libsql::params::IntoParams;
use libsql::{params, Connection, Row};

const NOTE_COLUMNS: &str = "id, server_id, title, content_path, is_draft, temp_delete, \
                            needs_sync, created_at, updated_at, synced_at";

/// Trait for note row storage operations (async)
///
/// Rows only; content artifacts are handled by the caller.
#[allow(async_fn_in_trait)]
pub trait NoteRepository {
    /// Insert a new note row
    async fn insert(&self, note: &Note) -> Result<()>;

    /// Overwrite every mutable column of an existing row
    async fn save(&self, note: &Note) -> Result<()>;

    /// Get a note by local ID, in any lifecycle state
    async fn get(&self, id: &NoteId) -> Result<Option<Note>>;

    /// Get the note carrying the given server ID (case-insensitive)
    async fn get_by_server_id(&self, server_id: &str) -> Result<Option<Note>>;

    /// Locate the local counterpart of a remote id: server id first, then local id
    async fn find_for_sync(&self, remote_id: &str) -> Result<Option<Note>>;

    /// List active notes, most recently updated first
    async fn list_active(&self, limit: usize, offset: usize) -> Result<Vec<Note>>;

    /// List trashed notes, most recently trashed first
    async fn list_trashed(&self) -> Result<Vec<Note>>;

    /// List notes whose local state has not been pushed, oldest first
    async fn list_needing_sync(&self) -> Result<Vec<Note>>;

    /// Count notes whose local state has not been pushed
    async fn count_needing_sync(&self) -> Result<usize>;

    /// List trashed notes last updated before `cutoff` (Unix ms)
    async fn list_trashed_before(&self, cutoff: i64) -> Result<Vec<Note>>;

    /// Active notes linked to a server id, used for full-fetch pruning
    async fn list_active_with_server_id(&self) -> Result<Vec<Note>>;

    /// Record a successful push.
    ///
    /// `server_id` is set when the row has none. `needs_sync` is cleared only
    /// when the row still has `expected_updated_at`; returns whether it was.
    async fn mark_synced_if_unchanged(
        &self,
        id: &NoteId,
        expected_updated_at: i64,
        server_id: Option<&str>,
    ) -> Result<bool>;

    /// Physically delete a row; returns whether it existed
    async fn remove(&self, id: &NoteId) -> Result<bool>;
}

/// libSQL implementation of `NoteRepository`
pub struct LibSqlNoteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlNoteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a note from a database row
    fn parse_note(row: &Row) -> Result<Note> {
        let id: String = row.get(0)?;
        Ok(Note {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid note id in store: {id}")))?,
            server_id: row.get(1)?,
            title: row.get(2)?,
            content_path: row.get(3)?,
            is_draft: row.get::<i32>(4)? != 0,
            temp_delete: row.get::<i32>(5)? != 0,
            needs_sync: row.get::<i32>(6)? != 0,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            synced_at: row.get(9)?,
        })
    }

    async fn query_one(&self, sql: &str, params: impl IntoParams) -> Result<Option<Note>> {
        let mut rows = self.conn.query(sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_note(&row)?)),
            None => Ok(None),
        }
    }

    async fn query_many(&self, sql: &str, params: impl IntoParams) -> Result<Vec<Note>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next().await? {
            notes.push(Self::parse_note(&row)?);
        }
        Ok(notes)
    }
}

impl NoteRepository for LibSqlNoteRepository<'_> {
    async fn insert(&self, note: &Note) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO notes ({NOTE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    note.id.as_str(),
                    note.server_id.as_deref().map(normalize_remote_id),
                    note.title.as_str(),
                    note.content_path.as_str(),
                    i32::from(note.is_draft),
                    i32::from(note.temp_delete),
                    i32::from(note.needs_sync),
                    note.created_at,
                    note.updated_at,
                    note.synced_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn save(&self, note: &Note) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE notes SET server_id = ?, title = ?, content_path = ?, is_draft = ?,
                    temp_delete = ?, needs_sync = ?, created_at = ?, updated_at = ?, synced_at = ?
                 WHERE id = ?",
                params![
                    note.server_id.as_deref().map(normalize_remote_id),
                    note.title.as_str(),
                    note.content_path.as_str(),
                    i32::from(note.is_draft),
                    i32::from(note.temp_delete),
                    i32::from(note.needs_sync),
                    note.created_at,
                    note.updated_at,
                    note.synced_at,
                    note.id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(note.id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &NoteId) -> Result<Option<Note>> {
        self.query_one(
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?"),
            [id.as_str()],
        )
        .await
    }

    async fn get_by_server_id(&self, server_id: &str) -> Result<Option<Note>> {
        self.query_one(
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE server_id = ?"),
            [normalize_remote_id(server_id)],
        )
        .await
    }

    async fn find_for_sync(&self, remote_id: &str) -> Result<Option<Note>> {
        if let Some(note) = self.get_by_server_id(remote_id).await? {
            return Ok(Some(note));
        }
        match remote_id.parse::<NoteId>() {
            Ok(id) => self.get(&id).await,
            // Server-minted ids need not be UUIDs
            Err(_) => Ok(None),
        }
    }

    async fn list_active(&self, limit: usize, offset: usize) -> Result<Vec<Note>> {
        self.query_many(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE temp_delete = 0
                 ORDER BY updated_at DESC
                 LIMIT ? OFFSET ?"
            ),
            params![limit as i64, offset as i64],
        )
        .await
    }

    async fn list_trashed(&self) -> Result<Vec<Note>> {
        self.query_many(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes WHERE temp_delete = 1 ORDER BY updated_at DESC"
            ),
            (),
        )
        .await
    }

    async fn list_needing_sync(&self) -> Result<Vec<Note>> {
        self.query_many(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes WHERE needs_sync = 1 ORDER BY updated_at ASC"
            ),
            (),
        )
        .await
    }

    async fn count_needing_sync(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM notes WHERE needs_sync = 1", ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn list_trashed_before(&self, cutoff: i64) -> Result<Vec<Note>> {
        self.query_many(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE temp_delete = 1 AND updated_at < ?
                 ORDER BY updated_at ASC"
            ),
            params![cutoff],
        )
        .await
    }

    async fn list_active_with_server_id(&self) -> Result<Vec<Note>> {
        self.query_many(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes WHERE temp_delete = 0 AND server_id IS NOT NULL"
            ),
            (),
        )
        .await
    }

    async fn mark_synced_if_unchanged(
        &self,
        id: &NoteId,
        expected_updated_at: i64,
        server_id: Option<&str>,
    ) -> Result<bool> {
        if let Some(server_id) = server_id.map(normalize_remote_id) {
            self.conn
                .execute(
                    "UPDATE notes SET server_id = COALESCE(server_id, ?) WHERE id = ?",
                    params![server_id, id.as_str()],
                )
                .await?;
        }

        let rows = self
            .conn
            .execute(
                "UPDATE notes SET needs_sync = 0, synced_at = updated_at
                 WHERE id = ? AND updated_at = ?",
                params![id.as_str(), expected_updated_at],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn remove(&self, id: &NoteId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM notes WHERE id = ?", [id.as_str()])
            .await?;
        Ok(rows > 0)
    }
}

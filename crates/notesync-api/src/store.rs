//! Remote note store.
//!
//! Notes are keyed by `(user_id, id)` with lowercase ids. Timestamps are Unix
//! seconds. Purging a note leaves a tombstone that feeds
//! `GET /notes/trash/sync` until the retention sweep removes it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libsql::params::IntoParams;
use libsql::{params, Builder, Connection, Database as LibSqlDatabase, Row};
use notesync_core::storage::FsContentStore;
use notesync_core::Result;
use tokio::sync::{Mutex, MutexGuard};

const CURRENT_VERSION: i32 = 1;

const NOTE_COLUMNS: &str =
    "id, title, content_path, is_draft, temp_delete, created_at, updated_at, synced_at";

/// A note row as stored on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNote {
    pub id: String,
    pub title: String,
    pub content_path: String,
    pub is_draft: bool,
    pub temp_delete: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub synced_at: Option<i64>,
}

/// Values written by the merge endpoint for one client note.
#[derive(Debug, Clone)]
pub struct NoteUpsert<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub content_path: &'a str,
    pub is_draft: bool,
    pub temp_delete: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Field changes of a partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct NotePatch<'a> {
    pub title: Option<&'a str>,
    pub is_draft: Option<bool>,
    pub content_changed: bool,
}

impl NotePatch<'_> {
    const fn is_empty(&self) -> bool {
        self.title.is_none() && self.is_draft.is_none() && !self.content_changed
    }
}

/// A purge tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub id: String,
    pub deleted_at: i64,
}

struct ServerDatabase {
    _db: LibSqlDatabase,
    conn: Connection,
}

#[derive(Clone)]
pub struct RemoteStore {
    db: Arc<Mutex<ServerDatabase>>,
    content_root: PathBuf,
}

impl RemoteStore {
    pub async fn open(path: impl AsRef<Path>, content_root: impl Into<PathBuf>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = Builder::new_local(path).build().await?;
        Self::initialize(db, content_root.into()).await
    }

    pub async fn open_in_memory(content_root: impl Into<PathBuf>) -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::initialize(db, content_root.into()).await
    }

    async fn initialize(db: LibSqlDatabase, content_root: PathBuf) -> Result<Self> {
        let conn = db.connect()?;
        // WAL is unavailable for in-memory databases
        conn.execute("PRAGMA journal_mode = WAL;", ()).await.ok();
        conn.execute("PRAGMA synchronous = NORMAL;", ()).await.ok();
        migrate(&conn).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(ServerDatabase { _db: db, conn })),
            content_root,
        })
    }

    async fn lock(&self) -> MutexGuard<'_, ServerDatabase> {
        self.db.lock().await
    }

    /// Artifact store for one user's note bodies.
    pub fn content_for(&self, user_id: &str) -> FsContentStore {
        FsContentStore::new(self.content_root.join(user_directory(user_id)))
    }

    pub async fn get(&self, user_id: &str, id: &str) -> Result<Option<StoredNote>> {
        let db = self.lock().await;
        query_one(
            &db.conn,
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ? AND id = ?"),
            params![user_id, normalize_id(id)],
        )
        .await
    }

    pub async fn list(&self, user_id: &str, include_deleted: bool) -> Result<Vec<StoredNote>> {
        let filter = if include_deleted {
            ""
        } else {
            " AND temp_delete = 0"
        };
        let db = self.lock().await;
        query_many(
            &db.conn,
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ?{filter} ORDER BY updated_at DESC"
            ),
            params![user_id],
        )
        .await
    }

    pub async fn list_trash(&self, user_id: &str) -> Result<Vec<StoredNote>> {
        let db = self.lock().await;
        query_many(
            &db.conn,
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ? AND temp_delete = 1 \
                 ORDER BY updated_at DESC"
            ),
            params![user_id],
        )
        .await
    }

    /// Notes changed or written by a merge at or after `cursor`; every note
    /// without a cursor.
    pub async fn changed_since(&self, user_id: &str, cursor: Option<i64>) -> Result<Vec<StoredNote>> {
        let db = self.lock().await;
        match cursor {
            Some(cursor) => {
                query_many(
                    &db.conn,
                    &format!(
                        "SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ? \
                         AND (updated_at >= ? OR synced_at >= ?) ORDER BY updated_at ASC"
                    ),
                    params![user_id, cursor, cursor],
                )
                .await
            }
            None => {
                query_many(
                    &db.conn,
                    &format!(
                        "SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ? ORDER BY updated_at ASC"
                    ),
                    params![user_id],
                )
                .await
            }
        }
    }

    /// Insert or overwrite a note from the merge endpoint and clear any tombstone.
    pub async fn upsert(&self, user_id: &str, note: &NoteUpsert<'_>, now: i64) -> Result<()> {
        let id = normalize_id(note.id);
        let db = self.lock().await;
        let conn = &db.conn;

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            conn.execute(
                "INSERT INTO notes (user_id, id, title, content_path, is_draft, temp_delete, \
                 created_at, updated_at, synced_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(user_id, id) DO UPDATE SET title = excluded.title, \
                 content_path = excluded.content_path, is_draft = excluded.is_draft, \
                 temp_delete = excluded.temp_delete, updated_at = excluded.updated_at, \
                 synced_at = excluded.synced_at",
                params![
                    user_id,
                    id.as_str(),
                    note.title,
                    note.content_path,
                    i32::from(note.is_draft),
                    i32::from(note.temp_delete),
                    note.created_at,
                    note.updated_at,
                    now
                ],
            )
            .await?;
            conn.execute(
                "DELETE FROM tombstones WHERE user_id = ? AND id = ?",
                params![user_id, id.as_str()],
            )
            .await?;
            Ok::<(), libsql::Error>(())
        }
        .await;

        finish(conn, result).await
    }

    /// Create or replace a note through `POST /notes`; the note leaves the trash.
    pub async fn create_or_replace(
        &self,
        user_id: &str,
        id: &str,
        title: &str,
        content_path: &str,
        is_draft: bool,
        now: i64,
    ) -> Result<StoredNote> {
        let id = normalize_id(id);
        let db = self.lock().await;
        let conn = &db.conn;

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            conn.execute(
                "INSERT INTO notes (user_id, id, title, content_path, is_draft, temp_delete, \
                 created_at, updated_at, synced_at) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?) \
                 ON CONFLICT(user_id, id) DO UPDATE SET title = excluded.title, \
                 content_path = excluded.content_path, is_draft = excluded.is_draft, \
                 temp_delete = 0, updated_at = excluded.updated_at, synced_at = excluded.synced_at",
                params![user_id, id.as_str(), title, content_path, i32::from(is_draft), now, now, now],
            )
            .await?;
            conn.execute(
                "DELETE FROM tombstones WHERE user_id = ? AND id = ?",
                params![user_id, id.as_str()],
            )
            .await?;
            Ok::<(), libsql::Error>(())
        }
        .await;
        finish(conn, result).await?;

        query_one(
            conn,
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ? AND id = ?"),
            params![user_id, id.as_str()],
        )
        .await?
        .ok_or_else(|| notesync_core::Error::Database(format!("note {id} vanished after write")))
    }

    /// Apply a partial update. Returns `None` when the note does not exist.
    pub async fn update(
        &self,
        user_id: &str,
        id: &str,
        patch: &NotePatch<'_>,
        now: i64,
    ) -> Result<Option<StoredNote>> {
        let id = normalize_id(id);
        let db = self.lock().await;
        let conn = &db.conn;

        if !patch.is_empty() {
            let current = query_one(
                conn,
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ? AND id = ?"),
                params![user_id, id.as_str()],
            )
            .await?;
            let Some(current) = current else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE notes SET title = ?, is_draft = ?, updated_at = ? \
                 WHERE user_id = ? AND id = ?",
                params![
                    patch.title.unwrap_or(current.title.as_str()),
                    i32::from(patch.is_draft.unwrap_or(current.is_draft)),
                    now,
                    user_id,
                    id.as_str()
                ],
            )
            .await?;
        }

        query_one(
            conn,
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ? AND id = ?"),
            params![user_id, id.as_str()],
        )
        .await
    }

    /// Move a note into or out of the trash. Restoring only matches trashed
    /// notes; trashing matches any note. Returns whether a row changed.
    pub async fn set_trashed(&self, user_id: &str, id: &str, trashed: bool, now: i64) -> Result<bool> {
        let sql = if trashed {
            "UPDATE notes SET temp_delete = 1, updated_at = ? WHERE user_id = ? AND id = ?"
        } else {
            "UPDATE notes SET temp_delete = 0, updated_at = ? \
             WHERE user_id = ? AND id = ? AND temp_delete = 1"
        };
        let db = self.lock().await;
        let changed = db
            .conn
            .execute(sql, params![now, user_id, normalize_id(id)])
            .await?;
        Ok(changed > 0)
    }

    /// Permanently delete a trashed note and record a tombstone.
    ///
    /// Returns the removed row, or `None` if no trashed note matched.
    pub async fn purge(&self, user_id: &str, id: &str, now: i64) -> Result<Option<StoredNote>> {
        let id = normalize_id(id);
        let db = self.lock().await;
        let conn = &db.conn;

        let Some(note) = query_one(
            conn,
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ? AND id = ? AND temp_delete = 1"
            ),
            params![user_id, id.as_str()],
        )
        .await?
        else {
            return Ok(None);
        };

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            conn.execute(
                "DELETE FROM notes WHERE user_id = ? AND id = ?",
                params![user_id, id.as_str()],
            )
            .await?;
            conn.execute(
                "INSERT INTO tombstones (user_id, id, deleted_at) VALUES (?, ?, ?) \
                 ON CONFLICT(user_id, id) DO UPDATE SET deleted_at = excluded.deleted_at",
                params![user_id, id.as_str(), now],
            )
            .await?;
            Ok::<(), libsql::Error>(())
        }
        .await;
        finish(conn, result).await?;

        Ok(Some(note))
    }

    /// Tombstones recorded at or after `cursor`; all of them without a cursor.
    pub async fn deleted_since(&self, user_id: &str, cursor: Option<i64>) -> Result<Vec<Tombstone>> {
        let db = self.lock().await;
        let mut rows = db
            .conn
            .query(
                "SELECT id, deleted_at FROM tombstones WHERE user_id = ? AND deleted_at >= ? \
                 ORDER BY deleted_at ASC",
                params![user_id, cursor.unwrap_or(i64::MIN)],
            )
            .await?;
        let mut tombstones = Vec::new();
        while let Some(row) = rows.next().await? {
            tombstones.push(Tombstone {
                id: row.get(0)?,
                deleted_at: row.get(1)?,
            });
        }
        Ok(tombstones)
    }

    /// Delete tombstones older than `cutoff` across all users.
    pub async fn sweep_tombstones(&self, cutoff: i64) -> Result<u64> {
        let db = self.lock().await;
        let removed = db
            .conn
            .execute(
                "DELETE FROM tombstones WHERE deleted_at < ?",
                params![cutoff],
            )
            .await?;
        Ok(removed)
    }
}

/// Directory name for a user's artifacts; hex keeps arbitrary ids path-safe.
fn user_directory(user_id: &str) -> String {
    user_id.bytes().map(|byte| format!("{byte:02x}")).collect()
}

fn normalize_id(id: &str) -> String {
    notesync_core::models::normalize_remote_id(id)
}

async fn finish(conn: &Connection, result: std::result::Result<(), libsql::Error>) -> Result<()> {
    if let Err(error) = result {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(error.into());
    }
    if let Err(error) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(error.into());
    }
    Ok(())
}

fn parse_note(row: &Row) -> Result<StoredNote> {
    Ok(StoredNote {
        id: row.get(0)?,
        title: row.get(1)?,
        content_path: row.get(2)?,
        is_draft: row.get::<i32>(3)? != 0,
        temp_delete: row.get::<i32>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        synced_at: row.get(7)?,
    })
}

async fn query_one(conn: &Connection, sql: &str, params: impl IntoParams) -> Result<Option<StoredNote>> {
    let mut rows = conn.query(sql, params).await?;
    match rows.next().await? {
        Some(row) => Ok(Some(parse_note(&row)?)),
        None => Ok(None),
    }
}

async fn query_many(conn: &Connection, sql: &str, params: impl IntoParams) -> Result<Vec<StoredNote>> {
    let mut rows = conn.query(sql, params).await?;
    let mut notes = Vec::new();
    while let Some(row) = rows.next().await? {
        notes.push(parse_note(&row)?);
    }
    Ok(notes)
}

async fn migrate(conn: &Connection) -> Result<()> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;
    let exists = match rows.next().await? {
        Some(row) => row.get::<i32>(0)? != 0,
        None => false,
    };
    let version = if exists {
        let mut rows = conn
            .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
            .await?;
        match rows.next().await? {
            Some(row) => row.get::<i32>(0)?,
            None => 0,
        }
    } else {
        0
    };
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        "CREATE TABLE IF NOT EXISTS notes (
            user_id TEXT NOT NULL,
            id TEXT NOT NULL,
            title TEXT NOT NULL,
            content_path TEXT NOT NULL,
            is_draft INTEGER NOT NULL DEFAULT 0,
            temp_delete INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            synced_at INTEGER,
            PRIMARY KEY (user_id, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_notes_user_updated ON notes(user_id, updated_at)",
        "CREATE INDEX IF NOT EXISTS idx_notes_user_synced ON notes(user_id, synced_at)",
        "CREATE TABLE IF NOT EXISTS tombstones (
            user_id TEXT NOT NULL,
            id TEXT NOT NULL,
            deleted_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_tombstones_deleted ON tombstones(deleted_at)",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    conn.execute("BEGIN TRANSACTION", ()).await?;
    for statement in statements {
        if let Err(error) = conn.execute(statement, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(error.into());
        }
    }
    if let Err(error) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(error.into());
    }
    tracing::info!("Migrated server database to version {CURRENT_VERSION}");
    Ok(())
}

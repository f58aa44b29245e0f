//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: notes with change tracking
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                server_id TEXT,
                title TEXT NOT NULL DEFAULT '',
                content_path TEXT NOT NULL,
                is_draft INTEGER NOT NULL DEFAULT 0,
                temp_delete INTEGER NOT NULL DEFAULT 0,
                needs_sync INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                synced_at INTEGER
            )",
            // At most one local record per remote identity
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_notes_server_id
                ON notes(server_id) WHERE server_id IS NOT NULL",
            "CREATE INDEX IF NOT EXISTS idx_notes_updated ON notes(updated_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_notes_needs_sync ON notes(needs_sync)",
            "CREATE INDEX IF NOT EXISTS idx_notes_temp_delete ON notes(temp_delete)",
            "INSERT INTO schema_version (version) VALUES (1)",
        ],
    )
    .await
}

/// Migration to version 2: authenticated session and sync cursor
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                user_id TEXT NOT NULL,
                token TEXT NOT NULL,
                last_sync_time INTEGER
            )",
            "INSERT INTO schema_version (version) VALUES (2)",
        ],
    )
    .await
}

async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

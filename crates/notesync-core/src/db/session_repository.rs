//! Session repository implementation

use crate::error::Result;
use crate::models::Session;
use libsql::{params, Connection};

/// Trait for the single persisted session (async)
#[allow(async_fn_in_trait)]
pub trait SessionRepository {
    /// Load the current session, if signed in
    async fn load(&self) -> Result<Option<Session>>;

    /// Replace the session; the sync cursor is reset
    async fn save(&self, user_id: &str, token: &str) -> Result<Session>;

    /// Remove the session
    async fn clear(&self) -> Result<()>;

    /// Update the sync cursor (Unix ms); no-op when signed out
    async fn set_last_sync_time(&self, last_sync_time: Option<i64>) -> Result<()>;
}

/// libSQL implementation of `SessionRepository`
pub struct LibSqlSessionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSessionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SessionRepository for LibSqlSessionRepository<'_> {
    async fn load(&self) -> Result<Option<Session>> {
        let mut rows = self
            .conn
            .query(
                "SELECT user_id, token, last_sync_time FROM sessions WHERE id = 1",
                (),
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(Session {
            user_id: row.get(0)?,
            token: row.get(1)?,
            last_sync_time: row.get(2)?,
        }))
    }

    async fn save(&self, user_id: &str, token: &str) -> Result<Session> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sessions (id, user_id, token, last_sync_time)
                 VALUES (1, ?, ?, NULL)",
                [user_id, token],
            )
            .await?;
        Ok(Session {
            user_id: user_id.to_string(),
            token: token.to_string(),
            last_sync_time: None,
        })
    }

    async fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM sessions", ()).await?;
        Ok(())
    }

    async fn set_last_sync_time(&self, last_sync_time: Option<i64>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sessions SET last_sync_time = ? WHERE id = 1",
                params![last_sync_time],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_session_by_default() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlSessionRepository::new(db.connection());

        assert!(repo.load().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_resets_cursor() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlSessionRepository::new(db.connection());

        repo.save("user-1", "token-1").await.unwrap();
        repo.set_last_sync_time(Some(42)).await.unwrap();
        assert_eq!(
            repo.load().await.unwrap().unwrap().last_sync_time,
            Some(42)
        );

        let session = repo.save("user-2", "token-2").await.unwrap();
        assert_eq!(repo.load().await.unwrap(), Some(session));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlSessionRepository::new(db.connection());

        repo.save("user-1", "token-1").await.unwrap();
        repo.clear().await.unwrap();
        assert!(repo.load().await.unwrap().is_none());

        // Cursor updates without a session are ignored
        repo.set_last_sync_time(Some(1)).await.unwrap();
        assert!(repo.load().await.unwrap().is_none());
    }
}

//! Authenticated session model

use std::fmt;

/// The signed-in user and the sync cursor persisted for that session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    /// Opaque bearer credential
    pub token: String,
    /// Sync cursor (Unix ms); `None` forces a full fetch
    pub last_sync_time: Option<i64>,
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("token", &"[REDACTED]")
            .field("last_sync_time", &self.last_sync_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_debug_redacts_token() {
        let session = Session {
            user_id: "user-1".to_string(),
            token: "secret-token".to_string(),
            last_sync_time: None,
        };
        let debug = format!("{session:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}

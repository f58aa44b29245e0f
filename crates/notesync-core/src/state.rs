//! Sync status shared by every client front end.

/// Coarse state of the sync engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    Offline,
    #[default]
    Idle,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

/// Point-in-time snapshot of the coordinator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Completion time of the last successful batch pass (Unix ms)
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
    pub auto_sync_enabled: bool,
    pub network_reachable: bool,
    /// Sync is paused until the user signs in again
    pub auth_paused: bool,
}

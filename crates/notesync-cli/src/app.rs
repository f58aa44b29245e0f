use std::path::{Path, PathBuf};

use notesync_core::config::SyncSettings;
use notesync_core::storage::FsContentStore;
use notesync_core::sync::{DeletionLifecycle, HttpSyncClient, SyncCoordinator};
use notesync_core::NoteStore;

use crate::error::CliError;

pub type Transport = Option<HttpSyncClient>;
pub type Coordinator = SyncCoordinator<FsContentStore, Transport>;

/// Local store and sync engine for one CLI invocation.
pub struct App {
    pub coordinator: Coordinator,
    pub settings: SyncSettings,
}

impl App {
    pub async fn open(db_path: &Path, settings: SyncSettings) -> Result<Self, CliError> {
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = FsContentStore::new(content_dir_for(db_path));
        let store = NoteStore::open_path(db_path.to_path_buf(), content).await?;
        let transport = if settings.is_configured() {
            Some(HttpSyncClient::from_settings(&settings).map_err(notesync_core::Error::from)?)
        } else {
            tracing::debug!("NOTESYNC_API_URL is not set; running local-only");
            None
        };

        Ok(Self {
            coordinator: SyncCoordinator::new(store, transport),
            settings,
        })
    }

    pub const fn store(&self) -> &NoteStore<FsContentStore> {
        self.coordinator.store()
    }

    pub fn lifecycle(&self) -> DeletionLifecycle<'_, FsContentStore, Transport> {
        self.coordinator.lifecycle(self.settings.trash_retention)
    }

    pub const fn require_remote(&self) -> Result<(), CliError> {
        if self.settings.is_configured() {
            Ok(())
        } else {
            Err(CliError::SyncNotConfigured)
        }
    }
}

/// Note bodies live in a `notes` directory next to the database file.
pub fn content_dir_for(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .map_or_else(|| PathBuf::from("notes"), |parent| parent.join("notes"))
}

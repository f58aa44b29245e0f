//! Deletion lifecycle: `Active -> Trashed -> Purged`, with restore as the only
//! way back.

use std::fmt;
use std::time::Duration;

use super::coordinator::{NoteSyncOutcome, SyncCoordinator};
use super::client::SyncTransport;
use crate::models::{Note, NoteId, NoteState};
use crate::storage::ContentStore;
use crate::util::now_millis;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Trash,
    Restore,
    Purge,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Trash => "trash",
            Self::Restore => "restore",
            Self::Purge => "purge",
        })
    }
}

/// State after applying `event`; `None` means the note is purged.
pub fn next_state(state: NoteState, event: LifecycleEvent) -> Result<Option<NoteState>> {
    match (state, event) {
        (NoteState::Active, LifecycleEvent::Trash) => Ok(Some(NoteState::Trashed)),
        (NoteState::Trashed, LifecycleEvent::Restore) => Ok(Some(NoteState::Active)),
        (NoteState::Trashed, LifecycleEvent::Purge) => Ok(None),
        (NoteState::Active, LifecycleEvent::Restore) => {
            Err(Error::InvalidInput("note is not in the trash".to_string()))
        }
        (NoteState::Trashed, LifecycleEvent::Trash) => {
            Err(Error::InvalidInput("note is already in the trash".to_string()))
        }
        (NoteState::Active, LifecycleEvent::Purge) => Err(Error::InvalidInput(
            "only notes in the trash can be purged".to_string(),
        )),
    }
}

/// Result of a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub purged: usize,
    pub failed: usize,
}

/// User-facing trash operations, pushed promptly when a session exists.
pub struct DeletionLifecycle<'a, C, T> {
    coordinator: &'a SyncCoordinator<C, T>,
    retention_millis: i64,
}

impl<'a, C: ContentStore, T: SyncTransport> DeletionLifecycle<'a, C, T> {
    pub fn new(coordinator: &'a SyncCoordinator<C, T>, retention: Duration) -> Self {
        Self {
            coordinator,
            retention_millis: i64::try_from(retention.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Move a note to the trash. The local change commits even if the push fails.
    pub async fn soft_delete(&self, id: &NoteId) -> Result<Note> {
        let note = self
            .coordinator
            .store()
            .transition(id, LifecycleEvent::Trash)
            .await?;
        self.push(&note, false).await;
        Ok(note)
    }

    /// Bring a note back from the trash.
    pub async fn restore(&self, id: &NoteId) -> Result<Note> {
        let note = self
            .coordinator
            .store()
            .transition(id, LifecycleEvent::Restore)
            .await?;
        self.push(&note, true).await;
        Ok(note)
    }

    /// Permanently delete a trashed note.
    ///
    /// A note known to the server is purged there first; if that fails the
    /// note stays in the trash with its content intact.
    pub async fn purge(&self, id: &NoteId) -> Result<()> {
        let store = self.coordinator.store();
        let note = store
            .get_note(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        next_state(note.state(), LifecycleEvent::Purge)?;

        if note.server_id.is_some() && self.coordinator.is_authenticated().await? {
            if let Some(session) = store.current_session().await? {
                self.coordinator.purge_remote(&session, &note).await?;
            }
        }

        store.remove_note(&note).await?;
        tracing::info!("Purged note {id}");
        Ok(())
    }

    /// Purge trashed notes past the retention window.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        self.sweep_expired_at(now_millis()).await
    }

    /// Like [`Self::sweep_expired`] with an explicit clock (Unix ms).
    pub async fn sweep_expired_at(&self, now: i64) -> Result<SweepReport> {
        let cutoff = now.saturating_sub(self.retention_millis);
        let expired = self.coordinator.store().list_trashed_before(cutoff).await?;
        let mut report = SweepReport::default();

        for note in expired {
            match self.purge(&note.id).await {
                Ok(()) => report.purged += 1,
                Err(error) => {
                    tracing::warn!("Failed to purge expired note {}: {error}", note.id);
                    report.failed += 1;
                }
            }
        }

        if report.purged > 0 || report.failed > 0 {
            tracing::info!(
                "Trash sweep: {} purged, {} failed",
                report.purged,
                report.failed
            );
        }
        Ok(report)
    }

    async fn push(&self, note: &Note, restored: bool) {
        if note.server_id.is_none() {
            return;
        }
        match self.coordinator.is_authenticated().await {
            Ok(true) => {}
            Ok(false) => return,
            Err(error) => {
                tracing::warn!("Failed to read session: {error}");
                return;
            }
        }
        let outcome = if restored {
            self.coordinator.sync_restored_note(&note.id).await
        } else {
            self.coordinator.sync_single_note(&note.id).await
        };
        if let NoteSyncOutcome::Failed(message) = outcome {
            tracing::debug!("Note {} stays pending after failed push: {message}", note.id);
        }
    }
}

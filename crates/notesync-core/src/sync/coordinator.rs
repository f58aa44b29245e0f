//! Sync coordinator: decides when reconciliation runs.
//!
//! One batch pass runs at a time (`is_syncing`). Individual notes are guarded
//! by a claim set keyed by local id that both the batch pass and single-note
//! pushes go through: a claimed note is skipped by everyone else until the
//! claim is released.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use super::client::SyncTransport;
use super::error::SyncError;
use super::lifecycle::DeletionLifecycle;
use super::protocol::{CreateNoteRequest, ServerNote, SyncResponse, TrashedNote, UpdateNoteRequest};
use super::reconcile::{self, ApplyContext, ConflictPolicy, ReconcileReport};
use super::scheduler::SyncTrigger;
use super::timestamp::{format_millis, parse_millis};
use crate::models::{normalize_remote_id, Note, NoteId, Session};
use crate::state::{SyncState, SyncStatus};
use crate::storage::ContentStore;
use crate::util::now_millis;
use crate::{Error, NoteStore, Result};

/// Why a requested sync did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadySyncing,
    AutoSyncDisabled,
    Offline,
    NotAuthenticated,
    ViewingNote,
    NothingToSync,
    /// Another push of the same note is in flight
    NoteBusy,
    NoteMissing,
}

impl SkipReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::AlreadySyncing => "a sync is already running",
            Self::AutoSyncDisabled => "auto-sync is disabled",
            Self::Offline => "offline",
            Self::NotAuthenticated => "not signed in",
            Self::ViewingNote => "a note is open",
            Self::NothingToSync => "nothing to sync",
            Self::NoteBusy => "the note is already syncing",
            Self::NoteMissing => "the note no longer exists",
        }
    }
}

/// Result of a batch sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Completed(ReconcileReport),
    Failed(String),
}

/// Result of a single-note push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteSyncOutcome {
    Skipped(SkipReason),
    /// `settled` is false when the note changed during the push and stays pending
    Pushed {
        server_id: Option<String>,
        settled: bool,
    },
    Failed(String),
}

/// Keeps scheduled syncs off while a note is open in an editor.
#[must_use = "viewing ends when the guard is dropped"]
pub struct ViewingGuard<'a> {
    viewers: &'a AtomicUsize,
}

impl Drop for ViewingGuard<'_> {
    fn drop(&mut self) {
        self.viewers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Held for the duration of a batch pass.
struct BatchGate<'a>(&'a AtomicBool);

impl<'a> BatchGate<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BatchGate<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Notes claimed by one sync operation; released on drop.
struct NoteClaim<'a> {
    in_flight: &'a Mutex<HashSet<NoteId>>,
    ids: HashSet<NoteId>,
}

impl NoteClaim<'_> {
    fn owns(&self, id: &NoteId) -> bool {
        self.ids.contains(id)
    }
}

impl Drop for NoteClaim<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for id in &self.ids {
            in_flight.remove(id);
        }
    }
}

/// Owns every piece of mutable sync state; construct one per store.
pub struct SyncCoordinator<C, T> {
    store: NoteStore<C>,
    transport: T,
    policy: ConflictPolicy,
    is_syncing: AtomicBool,
    auto_sync_enabled: AtomicBool,
    network_reachable: AtomicBool,
    auth_paused: AtomicBool,
    viewers: AtomicUsize,
    in_flight: Mutex<HashSet<NoteId>>,
    status: Mutex<SyncStatus>,
}

impl<C: ContentStore, T: SyncTransport> SyncCoordinator<C, T> {
    pub fn new(store: NoteStore<C>, transport: T) -> Self {
        Self {
            store,
            transport,
            policy: ConflictPolicy::default(),
            is_syncing: AtomicBool::new(false),
            auto_sync_enabled: AtomicBool::new(true),
            network_reachable: AtomicBool::new(true),
            auth_paused: AtomicBool::new(false),
            viewers: AtomicUsize::new(0),
            in_flight: Mutex::new(HashSet::new()),
            status: Mutex::new(SyncStatus {
                auto_sync_enabled: true,
                network_reachable: true,
                ..SyncStatus::default()
            }),
        }
    }

    #[must_use]
    pub const fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn store(&self) -> &NoteStore<C> {
        &self.store
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Trash lifecycle bound to this coordinator.
    pub fn lifecycle(&self, retention: Duration) -> DeletionLifecycle<'_, C, T> {
        DeletionLifecycle::new(self, retention)
    }

    pub fn status(&self) -> SyncStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_status(&self, update: impl FnOnce(&mut SyncStatus)) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut status);
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    pub fn is_viewing(&self) -> bool {
        self.viewers.load(Ordering::SeqCst) > 0
    }

    /// Mark a note as open; scheduled syncs are skipped until the guard drops.
    pub fn begin_viewing(&self) -> ViewingGuard<'_> {
        self.viewers.fetch_add(1, Ordering::SeqCst);
        ViewingGuard {
            viewers: &self.viewers,
        }
    }

    /// Whether a session exists and its token has not been rejected.
    pub async fn is_authenticated(&self) -> Result<bool> {
        if self.auth_paused.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.store.current_session().await?.is_some())
    }

    /// Enable or disable scheduled syncs; enabling syncs pending changes.
    pub async fn set_auto_sync_enabled(&self, enabled: bool) -> SyncOutcome {
        self.auto_sync_enabled.store(enabled, Ordering::SeqCst);
        self.update_status(|status| status.auto_sync_enabled = enabled);
        if enabled {
            self.sync_if_needed().await
        } else {
            SyncOutcome::Skipped(SkipReason::AutoSyncDisabled)
        }
    }

    /// Record a reachability change; regaining the network syncs pending changes.
    pub async fn on_connectivity_changed(&self, reachable: bool) -> SyncOutcome {
        self.network_reachable.store(reachable, Ordering::SeqCst);
        self.update_status(|status| {
            status.network_reachable = reachable;
            if !reachable {
                status.state = SyncState::Offline;
            } else if status.state == SyncState::Offline {
                status.state = SyncState::Idle;
            }
        });
        if reachable {
            self.sync_if_needed().await
        } else {
            SyncOutcome::Skipped(SkipReason::Offline)
        }
    }

    pub async fn on_foreground(&self) -> SyncOutcome {
        self.sync_if_needed().await
    }

    /// Periodic incremental sync; silently skipped unless every gate is open.
    pub async fn schedule_auto_sync(&self) -> SyncOutcome {
        if let Some(reason) = self.scheduled_gate() {
            return SyncOutcome::Skipped(reason);
        }
        self.perform_sync(false).await
    }

    /// Incremental sync only when some note needs pushing.
    pub async fn sync_if_needed(&self) -> SyncOutcome {
        if let Some(reason) = self.scheduled_gate() {
            return SyncOutcome::Skipped(reason);
        }
        match self.store.count_needing_sync().await {
            Ok(0) => SyncOutcome::Skipped(SkipReason::NothingToSync),
            Ok(_) => self.perform_sync(false).await,
            Err(error) => self.fail(&error),
        }
    }

    /// Full fetch ignoring the cursor (manual refresh, after login).
    pub async fn force_sync(&self) -> SyncOutcome {
        if self.is_syncing() {
            return SyncOutcome::Skipped(SkipReason::AlreadySyncing);
        }
        if !self.network_reachable.load(Ordering::SeqCst) {
            return SyncOutcome::Skipped(SkipReason::Offline);
        }
        if self.auth_paused.load(Ordering::SeqCst) {
            return SyncOutcome::Skipped(SkipReason::NotAuthenticated);
        }
        self.perform_sync(true).await
    }

    /// Store a new session, resume syncing and run a full fetch.
    pub async fn login(&self, user_id: &str, token: &str) -> Result<SyncOutcome> {
        let user_id = user_id.trim();
        let token = token.trim();
        if user_id.is_empty() || token.is_empty() {
            return Err(Error::InvalidInput(
                "user id and token are required".to_string(),
            ));
        }

        self.store.save_session(user_id, token).await?;
        self.auth_paused.store(false, Ordering::SeqCst);
        self.update_status(|status| {
            status.auth_paused = false;
            status.last_error = None;
        });
        tracing::info!("Signed in; running full sync");
        Ok(self.force_sync().await)
    }

    /// Forget the session. Local notes are kept.
    pub async fn logout(&self) -> Result<()> {
        self.store.clear_session().await?;
        self.auth_paused.store(false, Ordering::SeqCst);
        self.update_status(|status| {
            status.state = SyncState::Idle;
            status.last_synced_at = None;
            status.last_error = None;
            status.auth_paused = false;
        });
        tracing::info!("Signed out");
        Ok(())
    }

    /// Consume triggers one at a time until every sender is gone.
    pub async fn run(&self, mut triggers: mpsc::Receiver<SyncTrigger>) {
        while let Some(trigger) = triggers.recv().await {
            let outcome = self.handle(trigger).await;
            tracing::debug!("Handled {trigger:?}: {outcome:?}");
        }
    }

    pub async fn handle(&self, trigger: SyncTrigger) -> SyncOutcome {
        match trigger {
            SyncTrigger::Tick => self.schedule_auto_sync().await,
            SyncTrigger::Connectivity(reachable) => self.on_connectivity_changed(reachable).await,
            SyncTrigger::Foreground => self.on_foreground().await,
            SyncTrigger::Manual | SyncTrigger::Login => self.force_sync().await,
        }
    }

    fn scheduled_gate(&self) -> Option<SkipReason> {
        if self.is_syncing() {
            Some(SkipReason::AlreadySyncing)
        } else if !self.auto_sync_enabled.load(Ordering::SeqCst) {
            Some(SkipReason::AutoSyncDisabled)
        } else if !self.network_reachable.load(Ordering::SeqCst) {
            Some(SkipReason::Offline)
        } else if self.auth_paused.load(Ordering::SeqCst) {
            Some(SkipReason::NotAuthenticated)
        } else if self.is_viewing() {
            Some(SkipReason::ViewingNote)
        } else {
            None
        }
    }

    async fn perform_sync(&self, full: bool) -> SyncOutcome {
        let Some(_gate) = BatchGate::acquire(&self.is_syncing) else {
            return SyncOutcome::Skipped(SkipReason::AlreadySyncing);
        };

        let session = match self.store.current_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return SyncOutcome::Skipped(SkipReason::NotAuthenticated),
            Err(error) => return self.fail(&error),
        };

        self.update_status(|status| status.state = SyncState::Syncing);
        match self.run_pass(&session, full).await {
            Ok(report) => {
                let now = now_millis();
                self.update_status(|status| {
                    status.state = SyncState::Synced;
                    status.last_synced_at = Some(now);
                    status.last_error = None;
                });
                SyncOutcome::Completed(report)
            }
            Err(error) => self.fail(&error),
        }
    }

    async fn run_pass(&self, session: &Session, full: bool) -> Result<ReconcileReport> {
        let cursor = if full { None } else { session.last_sync_time };
        let pending = self.store.notes_needing_sync().await?;
        let claim = self.claim_available(pending.iter().map(|note| note.id));
        let batch_notes: Vec<Note> = pending
            .into_iter()
            .filter(|note| claim.owns(&note.id))
            .collect();

        let batch = reconcile::build_outgoing_batch(&self.store, &batch_notes, cursor).await?;
        tracing::debug!(
            "Sync pass: pushing {} notes ({})",
            batch.request.notes.len(),
            if cursor.is_none() { "full fetch" } else { "incremental" }
        );

        let response: SyncResponse = self
            .transport
            .sync(&session.token, &batch.request)
            .await
            .map_err(|error| self.observe(error))?;

        let context = ApplyContext {
            full_fetch: cursor.is_none(),
            policy: self.policy,
            pushed: batch.pushed,
            held: self.held_by_others(&claim),
        };
        let mut report = reconcile::apply_response(&self.store, &response, &context).await?;

        let since = cursor.map(format_millis);
        match self
            .transport
            .deleted_since(&session.token, since.as_deref())
            .await
        {
            Ok(feed) => {
                let held = self.held_by_others(&claim);
                match reconcile::apply_deletions(&self.store, &feed, &held).await {
                    Ok(removed) => report.removed_remotely = removed,
                    Err(error) => tracing::warn!("Failed to apply deletion feed: {error}"),
                }
            }
            Err(error) => tracing::warn!("Failed to fetch deletion feed: {error}"),
        }

        let next_cursor = parse_millis(&response.sync_time).unwrap_or_else(now_millis);
        self.store.set_last_sync_time(Some(next_cursor)).await?;
        Ok(report)
    }

    /// Push one note outside the batch cycle.
    pub async fn sync_single_note(&self, id: &NoteId) -> NoteSyncOutcome {
        self.push_single(id, false).await
    }

    /// Push a note that was just restored locally, restoring it remotely first.
    pub(crate) async fn sync_restored_note(&self, id: &NoteId) -> NoteSyncOutcome {
        self.push_single(id, true).await
    }

    async fn push_single(&self, id: &NoteId, restored: bool) -> NoteSyncOutcome {
        if !self.network_reachable.load(Ordering::SeqCst) {
            return NoteSyncOutcome::Skipped(SkipReason::Offline);
        }
        if self.auth_paused.load(Ordering::SeqCst) {
            return NoteSyncOutcome::Skipped(SkipReason::NotAuthenticated);
        }
        let Some(_claim) = self.claim_one(*id) else {
            tracing::debug!("Note {id} is already syncing; dropping request");
            return NoteSyncOutcome::Skipped(SkipReason::NoteBusy);
        };

        let session = match self.store.current_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return NoteSyncOutcome::Skipped(SkipReason::NotAuthenticated),
            Err(error) => return NoteSyncOutcome::Failed(error.to_string()),
        };

        match self.push_note(&session, id, restored).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!("Failed to sync note {id}: {error}");
                NoteSyncOutcome::Failed(error.to_string())
            }
        }
    }

    async fn push_note(
        &self,
        session: &Session,
        id: &NoteId,
        restored: bool,
    ) -> Result<NoteSyncOutcome> {
        let Some(note) = self.store.get_note(id).await? else {
            return Ok(NoteSyncOutcome::Skipped(SkipReason::NoteMissing));
        };
        let token = session.token.as_str();

        let server_id = match (note.server_id.as_deref(), note.temp_delete) {
            (Some(server_id), true) => {
                let body = self.store.read_body(&note).await?;
                let update = full_update(&note, body);
                // Fields first so edits made before trashing reach the server
                match self.transport.update_note(token, server_id, &update).await {
                    Ok(_) => match self.transport.delete_note(token, server_id).await {
                        Ok(()) | Err(SyncError::NotFound(_)) => {}
                        Err(error) => return Err(self.observe(error)),
                    },
                    // Already gone remotely; the deletion feed removes it here
                    Err(SyncError::NotFound(_)) => {}
                    Err(error) => return Err(self.observe(error)),
                }
                Some(server_id.to_string())
            }
            (Some(server_id), false) => {
                if restored {
                    match self.transport.restore_note(token, server_id).await {
                        Ok(()) => tracing::debug!("Restored note {server_id} from remote trash"),
                        Err(SyncError::NotFound(_)) => {}
                        Err(error) => return Err(self.observe(error)),
                    }
                }
                let body = self.store.read_body(&note).await?;
                let update = full_update(&note, body.clone());
                let stored = match self.transport.update_note(token, server_id, &update).await {
                    Ok(stored) => stored,
                    Err(SyncError::NotFound(_)) => {
                        self.create_remote(token, server_id, &note, body).await?
                    }
                    Err(error) => return Err(self.observe(error)),
                };
                Some(normalize_remote_id(&stored.id))
            }
            (None, false) => {
                let body = self.store.read_body(&note).await?;
                let stored = self
                    .create_remote(token, &note.id.as_str(), &note, body)
                    .await?;
                Some(normalize_remote_id(&stored.id))
            }
            // Never reached the server; nothing to trash remotely
            (None, true) => None,
        };

        let settled = self
            .store
            .mark_synced_if_unchanged(id, note.updated_at, server_id.as_deref())
            .await?;
        if !settled {
            tracing::debug!("Note {id} changed during push; it stays pending");
        }
        Ok(NoteSyncOutcome::Pushed { server_id, settled })
    }

    async fn create_remote(
        &self,
        token: &str,
        remote_id: &str,
        note: &Note,
        body: String,
    ) -> Result<ServerNote> {
        let request = CreateNoteRequest {
            id: Some(remote_id.to_string()),
            title: note.title.clone(),
            content: body,
            is_draft: note.is_draft,
        };
        self.transport
            .create_note(token, &request)
            .await
            .map_err(|error| self.observe(error))
    }

    /// Permanently delete a trashed note remotely.
    ///
    /// Succeeds only if the server no longer has the note afterwards.
    pub(crate) async fn purge_remote(&self, session: &Session, note: &Note) -> Result<()> {
        let Some(server_id) = note.server_id.as_deref() else {
            return Ok(());
        };
        let Some(_claim) = self.claim_one(note.id) else {
            return Err(Error::InvalidInput(format!(
                "note {} is syncing; try again",
                note.id
            )));
        };
        if !self.network_reachable.load(Ordering::SeqCst) {
            return Err(SyncError::Network("offline".to_string()).into());
        }
        let token = session.token.as_str();

        // The server only purges notes already in its trash
        if note.needs_sync {
            match self.transport.delete_note(token, server_id).await {
                Ok(()) | Err(SyncError::NotFound(_)) => {}
                Err(error) => return Err(self.observe(error)),
            }
        }

        match self.transport.purge_note(token, server_id).await {
            Ok(()) => Ok(()),
            // Either already purged or not in the remote trash
            Err(SyncError::NotFound(_)) => match self.transport.get_note(token, server_id).await {
                Err(SyncError::NotFound(_)) => Ok(()),
                Ok(_) => Err(Error::InvalidInput(format!(
                    "note {server_id} is not in the remote trash"
                ))),
                Err(error) => Err(self.observe(error)),
            },
            Err(error) => Err(self.observe(error)),
        }
    }

    /// Pull the server's copy of one note when it is not pending locally.
    pub async fn refresh_note(&self, id: &NoteId) -> Result<Option<ReconcileReport>> {
        let Some(session) = self.store.current_session().await? else {
            return Ok(None);
        };
        let Some(note) = self.store.get_note(id).await? else {
            return Err(Error::NotFound(id.to_string()));
        };
        let Some(_claim) = self.claim_one(note.id) else {
            return Ok(None);
        };

        let server_note = match self.transport.get_note(&session.token, &note.remote_id()).await {
            Ok(server_note) => server_note,
            Err(SyncError::NotFound(_)) => return Ok(None),
            Err(error) => return Err(self.observe(error)),
        };
        let response = SyncResponse {
            server_notes: vec![server_note],
            conflicts: Vec::new(),
            synced: Vec::new(),
            sync_time: format_millis(now_millis()),
        };
        let context = ApplyContext {
            policy: self.policy,
            ..ApplyContext::default()
        };
        reconcile::apply_response(&self.store, &response, &context)
            .await
            .map(Some)
    }

    /// Notes in the remote trash.
    pub async fn remote_trash(&self) -> Result<Vec<TrashedNote>> {
        let session = self
            .store
            .current_session()
            .await?
            .ok_or_else(|| SyncError::Unauthorized("not signed in".to_string()))?;
        self.transport
            .list_trash(&session.token)
            .await
            .map_err(|error| self.observe(error))
    }

    fn claim_one(&self, id: NoteId) -> Option<NoteClaim<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(id) {
            return None;
        }
        Some(NoteClaim {
            in_flight: &self.in_flight,
            ids: HashSet::from([id]),
        })
    }

    /// Claim every id not already claimed elsewhere.
    fn claim_available(&self, ids: impl IntoIterator<Item = NoteId>) -> NoteClaim<'_> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let ids = ids
            .into_iter()
            .filter(|id| in_flight.insert(*id))
            .collect();
        NoteClaim {
            in_flight: &self.in_flight,
            ids,
        }
    }

    fn held_by_others(&self, claim: &NoteClaim<'_>) -> HashSet<NoteId> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|id| !claim.owns(id))
            .copied()
            .collect()
    }

    /// Pause syncing on rejected credentials and wrap the error.
    fn observe(&self, error: SyncError) -> Error {
        if matches!(error, SyncError::Unauthorized(_)) {
            self.auth_paused.store(true, Ordering::SeqCst);
            self.update_status(|status| status.auth_paused = true);
            tracing::warn!("Remote store rejected the session; sync paused until sign-in");
        }
        Error::Sync(error)
    }

    fn fail(&self, error: &Error) -> SyncOutcome {
        tracing::error!("Sync failed: {error}");
        let message = error.to_string();
        self.update_status(|status| {
            status.state = SyncState::Error;
            status.last_error = Some(message.clone());
        });
        SyncOutcome::Failed(message)
    }
}

fn full_update(note: &Note, body: String) -> UpdateNoteRequest {
    UpdateNoteRequest {
        title: Some(note.title.clone()),
        content: Some(body),
        is_draft: Some(note.is_draft),
    }
}

//! Reconciliation engine.
//!
//! Builds the outgoing merge batch from notes needing sync and converges the
//! local store onto a merge response. A pass is applied inside one database
//! transaction; content artifacts written during the pass are journaled and
//! restored if the transaction does not commit.

use std::collections::{HashMap, HashSet};

use libsql::Connection;

use super::protocol::{ClientNote, DeletedNotesFeed, ServerNote, SyncRequest, SyncResponse};
use super::timestamp::{format_millis, parse_millis, parse_millis_or_now};
use crate::db::{LibSqlNoteRepository, NoteRepository};
use crate::models::{normalize_remote_id, normalize_title, Note, NoteId};
use crate::storage::ContentStore;
use crate::{Error, NoteStore, Result};

/// How a conflict entry that carries the server's copy of a note is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Adopt the server's copy, after non-conflicting server notes.
    #[default]
    ServerWins,
    /// Leave the local note pending so the next pass pushes it again.
    KeepLocal,
}

/// A pushed note as it was when the batch was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushedNote {
    pub id: NoteId,
    pub updated_at: i64,
}

/// The merge request for one pass plus what is needed to apply its response.
#[derive(Debug, Clone)]
pub struct OutgoingBatch {
    pub request: SyncRequest,
    /// Keyed by the transmitted (remote) id
    pub pushed: HashMap<String, PushedNote>,
}

impl OutgoingBatch {
    pub fn is_empty(&self) -> bool {
        self.request.notes.is_empty()
    }
}

/// Inputs of [`apply_response`] beyond the response itself.
#[derive(Debug, Clone, Default)]
pub struct ApplyContext {
    /// Request carried no cursor; enables pruning
    pub full_fetch: bool,
    pub policy: ConflictPolicy,
    pub pushed: HashMap<String, PushedNote>,
    /// Local ids owned by a concurrent single-note push; never touched
    pub held: HashSet<NoteId>,
}

/// Counts of what a pass did to the local store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub pushed: usize,
    pub created: usize,
    pub updated: usize,
    pub acknowledged: usize,
    pub unchanged: usize,
    /// Server values not applied because local edits are still pending
    pub preserved: usize,
    pub conflicts: usize,
    pub pruned: usize,
    pub removed_remotely: usize,
}

impl ReconcileReport {
    /// Number of local rows created, changed or deleted
    pub const fn mutations(&self) -> usize {
        self.created + self.updated + self.acknowledged + self.pruned + self.removed_remotely
    }
}

/// Build the merge request from the given notes (active and trashed alike).
pub async fn build_outgoing_batch<C: ContentStore>(
    store: &NoteStore<C>,
    notes: &[Note],
    last_sync_time: Option<i64>,
) -> Result<OutgoingBatch> {
    let mut request = SyncRequest {
        notes: Vec::with_capacity(notes.len()),
        last_sync_time: last_sync_time.map(format_millis),
    };
    let mut pushed = HashMap::with_capacity(notes.len());

    for note in notes {
        let remote_id = note.remote_id();
        request.notes.push(ClientNote {
            id: remote_id.clone(),
            title: note.title.clone(),
            content: store.read_body(note).await?,
            is_draft: note.is_draft,
            temp_delete: note.temp_delete,
            created_at: Some(format_millis(note.created_at)),
            updated_at: Some(format_millis(note.updated_at)),
        });
        pushed.insert(
            remote_id,
            PushedNote {
                id: note.id,
                updated_at: note.updated_at,
            },
        );
    }

    Ok(OutgoingBatch { request, pushed })
}

/// Converge the local store onto a merge response.
///
/// Server notes are applied first, then conflicts carrying a server copy (per
/// policy), then pruning on full fetches. Nothing is persisted unless the
/// whole pass succeeds.
pub async fn apply_response<C: ContentStore>(
    store: &NoteStore<C>,
    response: &SyncResponse,
    context: &ApplyContext,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport {
        pushed: context.pushed.len(),
        conflicts: response.conflicts.len(),
        ..ReconcileReport::default()
    };

    let mut adopted = Vec::new();
    let mut rejected = HashSet::new();
    for conflict in &response.conflicts {
        match (&conflict.server_note, context.policy) {
            (Some(server_note), ConflictPolicy::ServerWins) => {
                tracing::debug!(
                    "Conflict on {} ({}): adopting server copy",
                    conflict.note_id,
                    conflict.reason
                );
                adopted.push(server_note);
            }
            _ => {
                tracing::warn!(
                    "Server rejected note {} ({}); it stays pending",
                    conflict.note_id,
                    conflict.reason
                );
                rejected.insert(normalize_remote_id(&conflict.note_id));
            }
        }
    }

    let db = store.lock().await;
    let conn = db.connection();
    let mut pass = Pass {
        conn,
        content: store.content(),
        context,
        rejected: &rejected,
        journal: ArtifactJournal::default(),
        report: &mut report,
        stale_artifacts: Vec::new(),
    };

    conn.execute("BEGIN TRANSACTION", ()).await?;
    let applied = pass.run(&response.server_notes, &adopted, &response.synced).await;
    let committed = match applied {
        Ok(()) => conn.execute("COMMIT", ()).await.map_err(Error::from),
        Err(error) => Err(error),
    };

    if let Err(error) = committed {
        conn.execute("ROLLBACK", ()).await.ok();
        pass.journal.undo(store.content()).await;
        tracing::error!("Reconciliation rolled back: {error}");
        return Err(error);
    }

    let stale_artifacts = std::mem::take(&mut pass.stale_artifacts);
    drop(pass);
    drop(db);
    remove_artifacts(store.content(), &stale_artifacts).await;

    tracing::info!(
        "Reconciled: {} pushed, {} created, {} updated, {} unchanged, {} pruned, {} conflicts",
        report.pushed,
        report.created,
        report.updated,
        report.unchanged,
        report.pruned,
        report.conflicts
    );
    Ok(report)
}

/// Remove local notes that were permanently deleted on the server.
pub async fn apply_deletions<C: ContentStore>(
    store: &NoteStore<C>,
    feed: &DeletedNotesFeed,
    held: &HashSet<NoteId>,
) -> Result<usize> {
    if feed.deleted_notes.is_empty() {
        return Ok(0);
    }

    let db = store.lock().await;
    let conn = db.connection();
    let repo = LibSqlNoteRepository::new(conn);
    let mut removed = Vec::new();

    conn.execute("BEGIN TRANSACTION", ()).await?;
    let outcome = async {
        for deleted in &feed.deleted_notes {
            let Some(local) = repo.find_for_sync(&deleted.id).await? else {
                continue;
            };
            if held.contains(&local.id) {
                continue;
            }
            repo.remove(&local.id).await?;
            tracing::debug!(
                "Removed note {} deleted remotely at {}",
                local.id,
                deleted.deleted_at
            );
            removed.push(local.content_path);
        }
        conn.execute("COMMIT", ()).await?;
        Ok::<(), Error>(())
    }
    .await;

    if let Err(error) = outcome {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(error);
    }
    drop(db);

    remove_artifacts(store.content(), &removed).await;
    Ok(removed.len())
}

struct Pass<'a, C> {
    conn: &'a Connection,
    content: &'a C,
    context: &'a ApplyContext,
    rejected: &'a HashSet<String>,
    journal: ArtifactJournal,
    report: &'a mut ReconcileReport,
    stale_artifacts: Vec<String>,
}

impl<C: ContentStore> Pass<'_, C> {
    async fn run(
        &mut self,
        server_notes: &[ServerNote],
        adopted: &[&ServerNote],
        synced: &[String],
    ) -> Result<()> {
        let mut returned = HashSet::new();

        for server_note in server_notes {
            if let Some(remote_id) = self.apply(server_note, false).await? {
                returned.insert(remote_id);
            }
        }
        for server_note in adopted {
            if let Some(remote_id) = self.apply(server_note, true).await? {
                returned.insert(remote_id);
            }
        }

        self.acknowledge(synced, &returned).await?;

        if self.context.full_fetch {
            self.prune(&returned).await?;
        }
        Ok(())
    }

    /// Apply one server note; returns its normalized id.
    async fn apply(&mut self, server: &ServerNote, from_conflict: bool) -> Result<Option<String>> {
        let remote_id = normalize_remote_id(&server.id);
        if remote_id.is_empty() {
            tracing::warn!("Ignoring server note without an id");
            return Ok(None);
        }

        let repo = LibSqlNoteRepository::new(self.conn);
        match repo.find_for_sync(&remote_id).await? {
            Some(local) => {
                self.update_local(&repo, local, server, &remote_id, from_conflict)
                    .await?;
            }
            None => self.create_local(&repo, server, &remote_id).await?,
        }
        Ok(Some(remote_id))
    }

    async fn update_local(
        &mut self,
        repo: &LibSqlNoteRepository<'_>,
        local: Note,
        server: &ServerNote,
        remote_id: &str,
        from_conflict: bool,
    ) -> Result<()> {
        if self.preserves_local(&local, remote_id, from_conflict) {
            tracing::debug!("Keeping pending local edits of note {}", local.id);
            self.report.preserved += 1;
            return Ok(());
        }

        let updated_at = parse_millis_or_now(server.updated_at.as_deref());
        let mut target = local.clone();
        target.server_id = Some(remote_id.to_string());
        target.title = normalize_title(&server.title);
        target.is_draft = server.is_draft;
        target.temp_delete = server.temp_delete;
        target.needs_sync = false;
        if let Some(created_at) = server.created_at.as_deref().and_then(parse_millis) {
            target.created_at = created_at;
        }
        target.updated_at = updated_at;
        target.synced_at = Some(synced_at_for(server, updated_at));

        let body_changed = match server.content.as_deref() {
            Some(body) => body != self.content.read_text(&local.content_path).await?,
            None => false,
        };

        if target == local && !body_changed {
            self.report.unchanged += 1;
            return Ok(());
        }

        if let Some(body) = server.content.as_deref().filter(|_| body_changed) {
            target.content_path = self
                .journal
                .write(self.content, &target.id, Some(&local.content_path), body)
                .await?;
        }
        repo.save(&target).await?;
        tracing::debug!("Updated note {} from server {remote_id}", target.id);
        self.report.updated += 1;
        Ok(())
    }

    async fn create_local(
        &mut self,
        repo: &LibSqlNoteRepository<'_>,
        server: &ServerNote,
        remote_id: &str,
    ) -> Result<()> {
        // An overlapping pass may already have linked this id
        if repo.get_by_server_id(remote_id).await?.is_some() {
            tracing::debug!("Skipping duplicate of server note {remote_id}");
            return Ok(());
        }

        let updated_at = parse_millis_or_now(server.updated_at.as_deref());
        let created_at = server
            .created_at
            .as_deref()
            .and_then(parse_millis)
            .unwrap_or(updated_at);

        let mut note = Note {
            id: NoteId::new(),
            server_id: Some(remote_id.to_string()),
            title: normalize_title(&server.title),
            content_path: String::new(),
            is_draft: server.is_draft,
            temp_delete: server.temp_delete,
            needs_sync: false,
            created_at,
            updated_at,
            synced_at: Some(synced_at_for(server, updated_at)),
        };
        let body = server.content.as_deref().unwrap_or_default();
        note.content_path = self.journal.write(self.content, &note.id, None, body).await?;

        repo.insert(&note).await?;
        tracing::debug!("Created note {} for server {remote_id}", note.id);
        self.report.created += 1;
        Ok(())
    }

    /// Pushed notes the server accepted but did not echo back.
    async fn acknowledge(&mut self, synced: &[String], returned: &HashSet<String>) -> Result<()> {
        let repo = LibSqlNoteRepository::new(self.conn);
        for id in synced {
            let remote_id = normalize_remote_id(id);
            if returned.contains(&remote_id) {
                continue;
            }
            let Some(pushed) = self.context.pushed.get(&remote_id) else {
                continue;
            };
            if self.context.held.contains(&pushed.id) {
                continue;
            }
            if repo
                .mark_synced_if_unchanged(&pushed.id, pushed.updated_at, Some(remote_id.as_str()))
                .await?
            {
                self.report.acknowledged += 1;
            }
        }
        Ok(())
    }

    async fn prune(&mut self, returned: &HashSet<String>) -> Result<()> {
        let repo = LibSqlNoteRepository::new(self.conn);
        for local in repo.list_active_with_server_id().await? {
            let Some(server_id) = local.server_id.as_deref().map(normalize_remote_id) else {
                continue;
            };
            if returned.contains(&server_id)
                || self.context.held.contains(&local.id)
                || self.rejected.contains(&server_id)
            {
                continue;
            }

            repo.remove(&local.id).await?;
            tracing::debug!("Pruned note {} missing from full fetch", local.id);
            self.stale_artifacts.push(local.content_path);
            self.report.pruned += 1;
        }
        Ok(())
    }

    /// Whether pending local edits must survive this server value.
    fn preserves_local(&self, local: &Note, remote_id: &str, from_conflict: bool) -> bool {
        if self.context.held.contains(&local.id) {
            return true;
        }
        if !local.needs_sync {
            return false;
        }
        match self.context.pushed.get(&local.remote_id()) {
            // Edited after the batch was built
            Some(pushed) if local.updated_at > pushed.updated_at => true,
            Some(_) => !from_conflict && self.rejected.contains(remote_id),
            // Never pushed
            None => true,
        }
    }
}

/// `synced_at` from the server, never later than `updated_at`.
fn synced_at_for(server: &ServerNote, updated_at: i64) -> i64 {
    server
        .synced_at
        .as_deref()
        .and_then(parse_millis)
        .unwrap_or(updated_at)
        .min(updated_at)
}

/// Artifacts written during a pass, with what they replaced.
#[derive(Default)]
struct ArtifactJournal {
    entries: Vec<JournalEntry>,
}

struct JournalEntry {
    note_id: NoteId,
    path: String,
    previous: Option<Vec<u8>>,
}

impl ArtifactJournal {
    async fn write<C: ContentStore>(
        &mut self,
        content: &C,
        note_id: &NoteId,
        existing_path: Option<&str>,
        body: &str,
    ) -> Result<String> {
        let previous = match existing_path {
            Some(path) => match content.read(path).await {
                Ok(bytes) => Some(bytes),
                Err(Error::NotFound(_)) => None,
                Err(error) => return Err(error),
            },
            None => None,
        };

        let path = content.write(&note_id.as_str(), body.as_bytes()).await?;
        self.entries.push(JournalEntry {
            note_id: *note_id,
            path: path.clone(),
            previous,
        });
        Ok(path)
    }

    async fn undo<C: ContentStore>(&mut self, content: &C) {
        for entry in self.entries.drain(..).rev() {
            let restored = match entry.previous {
                Some(bytes) => content
                    .write(&entry.note_id.as_str(), &bytes)
                    .await
                    .map(drop),
                None => content.delete(&entry.path).await,
            };
            if let Err(error) = restored {
                tracing::warn!("Failed to restore artifact {}: {error}", entry.path);
            }
        }
    }
}

async fn remove_artifacts<C: ContentStore>(content: &C, paths: &[String]) {
    for path in paths {
        if let Err(error) = content.delete(path).await {
            tracing::warn!("Failed to delete artifact {path}: {error}");
        }
    }
}

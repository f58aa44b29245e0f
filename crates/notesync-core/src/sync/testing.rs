//! In-memory remote store for coordinator and lifecycle tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::client::SyncTransport;
use super::error::{SyncError, SyncResult};
use super::protocol::{
    CreateNoteRequest, DeletedNote, DeletedNotesFeed, ServerNote, SyncRequest, SyncResponse,
    TrashedNote, UpdateNoteRequest,
};
use super::timestamp::{self, parse_seconds};
use super::SyncCoordinator;
use crate::models::normalize_remote_id;
use crate::storage::MemoryContentStore;
use crate::NoteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Network,
    Unauthorized,
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    notes: Mutex<BTreeMap<String, ServerNote>>,
    deleted: Mutex<Vec<DeletedNote>>,
    calls: Mutex<Vec<&'static str>>,
    failure: Mutex<Option<Failure>>,
    delay: Mutex<Duration>,
}

impl FakeTransport {
    pub fn set_failure(&self, failure: Option<Failure>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = failure;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| **call == name)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn insert(&self, note: ServerNote) {
        self.notes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize_remote_id(&note.id), note);
    }

    pub fn note(&self, id: &str) -> Option<ServerNote> {
        self.notes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize_remote_id(id))
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Option<ServerNote> {
        self.notes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&normalize_remote_id(id))
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|deleted| deleted.id.clone())
            .collect()
    }

    async fn enter(&self, name: &'static str) -> SyncResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name);
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match *self.failure.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(Failure::Network) => Err(SyncError::Network("connection reset".to_string())),
            Some(Failure::Unauthorized) => {
                Err(SyncError::Unauthorized("invalid token".to_string()))
            }
            None => Ok(()),
        }
    }

    fn modify(
        &self,
        id: &str,
        change: impl FnOnce(&mut ServerNote) -> bool,
    ) -> SyncResult<ServerNote> {
        let mut notes = self.notes.lock().unwrap_or_else(PoisonError::into_inner);
        let note = notes
            .get_mut(&normalize_remote_id(id))
            .ok_or_else(|| SyncError::NotFound(format!("note {id}")))?;
        if !change(note) {
            return Err(SyncError::NotFound(format!("note {id}")));
        }
        note.updated_at = Some(timestamp::now());
        Ok(note.clone())
    }
}

impl SyncTransport for FakeTransport {
    async fn sync(&self, _token: &str, request: &SyncRequest) -> SyncResult<SyncResponse> {
        self.enter("sync").await?;
        let now = timestamp::now();
        let mut notes = self.notes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut synced = Vec::new();

        for client in &request.notes {
            let id = normalize_remote_id(&client.id);
            notes.insert(
                id.clone(),
                ServerNote {
                    id: id.clone(),
                    title: client.title.clone(),
                    content: Some(client.content.clone()),
                    is_draft: client.is_draft,
                    temp_delete: client.temp_delete,
                    created_at: client.created_at.clone().or_else(|| Some(now.clone())),
                    updated_at: Some(now.clone()),
                    synced_at: Some(now.clone()),
                },
            );
            synced.push(id);
        }

        let cursor = request.last_sync_time.as_deref().and_then(parse_seconds);
        let server_notes = notes
            .values()
            .filter(|note| match cursor {
                None => true,
                Some(cursor) => {
                    synced.contains(&note.id)
                        || note
                            .updated_at
                            .as_deref()
                            .and_then(parse_seconds)
                            .is_some_and(|updated| updated >= cursor)
                }
            })
            .cloned()
            .collect();

        Ok(SyncResponse {
            server_notes,
            conflicts: Vec::new(),
            synced,
            sync_time: now,
        })
    }

    async fn create_note(
        &self,
        _token: &str,
        request: &CreateNoteRequest,
    ) -> SyncResult<ServerNote> {
        self.enter("create").await?;
        let now = timestamp::now();
        let id = request
            .id
            .as_deref()
            .map_or_else(|| uuid::Uuid::now_v7().to_string(), normalize_remote_id);
        let note = ServerNote {
            id: id.clone(),
            title: request.title.clone(),
            content: Some(request.content.clone()),
            is_draft: request.is_draft,
            temp_delete: false,
            created_at: Some(now.clone()),
            updated_at: Some(now.clone()),
            synced_at: Some(now),
        };
        self.insert(note.clone());
        Ok(note)
    }

    async fn update_note(
        &self,
        _token: &str,
        id: &str,
        request: &UpdateNoteRequest,
    ) -> SyncResult<ServerNote> {
        self.enter("update").await?;
        self.modify(id, |note| {
            if let Some(title) = &request.title {
                note.title.clone_from(title);
            }
            if let Some(content) = &request.content {
                note.content = Some(content.clone());
            }
            if let Some(is_draft) = request.is_draft {
                note.is_draft = is_draft;
            }
            true
        })
    }

    async fn delete_note(&self, _token: &str, id: &str) -> SyncResult<()> {
        self.enter("delete").await?;
        self.modify(id, |note| {
            note.temp_delete = true;
            true
        })
        .map(|_| ())
    }

    async fn restore_note(&self, _token: &str, id: &str) -> SyncResult<()> {
        self.enter("restore").await?;
        self.modify(id, |note| {
            let trashed = note.temp_delete;
            note.temp_delete = false;
            trashed
        })
        .map(|_| ())
    }

    async fn purge_note(&self, _token: &str, id: &str) -> SyncResult<()> {
        self.enter("purge").await?;
        let id = normalize_remote_id(id);
        let mut notes = self.notes.lock().unwrap_or_else(PoisonError::into_inner);
        if !notes.get(&id).is_some_and(|note| note.temp_delete) {
            return Err(SyncError::NotFound(format!("note {id} is not in the trash")));
        }
        notes.remove(&id);
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DeletedNote {
                id,
                deleted_at: timestamp::now(),
            });
        Ok(())
    }

    async fn list_trash(&self, _token: &str) -> SyncResult<Vec<TrashedNote>> {
        self.enter("list_trash").await?;
        Ok(self
            .notes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|note| note.temp_delete)
            .map(|note| TrashedNote {
                id: note.id.clone(),
                title: note.title.clone(),
                content: note.content.clone(),
                deleted_at: note.updated_at.clone().unwrap_or_else(timestamp::now),
            })
            .collect())
    }

    async fn deleted_since(
        &self,
        _token: &str,
        since: Option<&str>,
    ) -> SyncResult<DeletedNotesFeed> {
        self.enter("deleted_since").await?;
        let cursor = since.and_then(parse_seconds);
        let deleted_notes = self
            .deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|deleted| match cursor {
                None => true,
                Some(cursor) => parse_seconds(&deleted.deleted_at).is_some_and(|at| at >= cursor),
            })
            .cloned()
            .collect();
        Ok(DeletedNotesFeed {
            deleted_notes,
            last_sync_time: timestamp::now(),
        })
    }

    async fn get_note(&self, _token: &str, id: &str) -> SyncResult<ServerNote> {
        self.enter("get").await?;
        self.note(id)
            .ok_or_else(|| SyncError::NotFound(format!("note {id}")))
    }
}

pub type TestCoordinator = SyncCoordinator<MemoryContentStore, FakeTransport>;

pub async fn coordinator() -> TestCoordinator {
    let store = NoteStore::open_in_memory(MemoryContentStore::new())
        .await
        .unwrap();
    SyncCoordinator::new(store, FakeTransport::default())
}

/// Coordinator with a stored session and no sync run yet.
pub async fn signed_in() -> TestCoordinator {
    let coordinator = coordinator().await;
    coordinator
        .store()
        .save_session("user-1", "token-1")
        .await
        .unwrap();
    coordinator
}

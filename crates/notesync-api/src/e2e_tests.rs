//! Drives the client engine against a live server on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notesync_core::storage::MemoryContentStore;
use notesync_core::sync::{HttpSyncClient, NoteSyncOutcome, SyncCoordinator, SyncOutcome};
use notesync_core::{NoteEdit, NoteStore};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::auth::sign_test_token;
use crate::config::test_config;
use crate::routes::{app_router, AppState};
use crate::store::RemoteStore;

type Device = SyncCoordinator<MemoryContentStore, HttpSyncClient>;

struct Server {
    base_url: String,
    store: RemoteStore,
    _dir: tempfile::TempDir,
}

async fn start_server() -> Server {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(dir.path().join("content")));
    let store = RemoteStore::open(dir.path().join("server.db"), config.content_dir.clone())
        .await
        .unwrap();
    let router = app_router(AppState::new(config, store.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Server {
        base_url: format!("http://{addr}"),
        store,
        _dir: dir,
    }
}

async fn device(server: &Server) -> Device {
    let store = NoteStore::open_in_memory(MemoryContentStore::new())
        .await
        .unwrap();
    let client = HttpSyncClient::new(server.base_url.clone(), Duration::from_secs(5)).unwrap();
    SyncCoordinator::new(store, client)
}

fn token() -> String {
    sign_test_token(
        "test-secret-with-enough-bytes",
        &json!({ "sub": "user-1", "exp": Utc::now().timestamp() + 3_600 }),
    )
}

fn completed(outcome: SyncOutcome) -> notesync_core::sync::ReconcileReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        other => panic!("expected a completed sync, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn two_devices_converge_through_the_server() {
    let server = start_server().await;
    let laptop = device(&server).await;
    let phone = device(&server).await;

    completed(laptop.login("user-1", &token()).await.unwrap());
    let note = laptop
        .store()
        .create_note("Groceries", "milk", false)
        .await
        .unwrap();
    let outcome = laptop.sync_single_note(&note.id).await;
    assert_eq!(
        outcome,
        NoteSyncOutcome::Pushed {
            server_id: Some(note.id.as_str()),
            settled: true,
        }
    );

    let report = completed(phone.login("user-1", &token()).await.unwrap());
    assert_eq!(report.created, 1);
    let on_phone = phone
        .store()
        .get_note_by_server_id(&note.id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(phone.store().read_body(&on_phone).await.unwrap(), "milk");
    assert!(!on_phone.needs_sync);

    laptop
        .store()
        .update_note(
            &note.id,
            &NoteEdit {
                content: Some("milk, eggs".to_string()),
                ..NoteEdit::default()
            },
        )
        .await
        .unwrap();
    completed(laptop.force_sync().await);
    completed(phone.force_sync().await);
    let on_phone = phone.store().get_note(&on_phone.id).await.unwrap().unwrap();
    assert_eq!(phone.store().read_body(&on_phone).await.unwrap(), "milk, eggs");

    let retention = Duration::from_secs(30 * 24 * 3_600);
    laptop.lifecycle(retention).soft_delete(&note.id).await.unwrap();
    completed(phone.force_sync().await);
    let trashed = phone.store().list_trash().await.unwrap();
    assert_eq!(trashed.len(), 1);

    laptop.lifecycle(retention).purge(&note.id).await.unwrap();
    assert!(laptop.store().get_note(&note.id).await.unwrap().is_none());
    assert!(server
        .store
        .get("user-1", &note.id.as_str())
        .await
        .unwrap()
        .is_none());

    let report = completed(phone.force_sync().await);
    assert_eq!(report.removed_remotely, 1);
    assert!(phone.store().get_note(&on_phone.id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn second_sync_without_changes_is_a_no_op() {
    let server = start_server().await;
    let laptop = device(&server).await;
    completed(laptop.login("user-1", &token()).await.unwrap());
    laptop
        .store()
        .create_note("Plan", "step one", true)
        .await
        .unwrap();

    let first = completed(laptop.force_sync().await);
    assert_eq!(first.pushed, 1);
    let second = completed(laptop.force_sync().await);
    assert_eq!(second.pushed, 0);
    assert_eq!(second.mutations(), 0);
    assert_eq!(laptop.store().count_needing_sync().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_token_pauses_sync() {
    let server = start_server().await;
    let laptop = device(&server).await;
    let outcome = laptop.login("user-1", "not-a-jwt").await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Failed(_)));
    assert!(!laptop.is_authenticated().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn edits_made_before_trashing_reach_the_server() {
    let server = start_server().await;
    let laptop = device(&server).await;
    completed(laptop.login("user-1", &token()).await.unwrap());
    let note = laptop
        .store()
        .create_note("Original", "first draft", false)
        .await
        .unwrap();
    laptop.sync_single_note(&note.id).await;

    laptop
        .store()
        .update_note(
            &note.id,
            &NoteEdit {
                title: Some("Edited".to_string()),
                ..NoteEdit::default()
            },
        )
        .await
        .unwrap();
    let retention = Duration::from_secs(30 * 24 * 3_600);
    laptop.lifecycle(retention).soft_delete(&note.id).await.unwrap();

    let remote = server
        .store
        .get("user-1", &note.id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remote.title, "Edited");
    assert!(remote.temp_delete);

    completed(laptop.force_sync().await);
    let local = laptop.store().get_note(&note.id).await.unwrap().unwrap();
    assert_eq!(local.title, "Edited");
    assert!(local.temp_delete);
}

#[tokio::test(flavor = "multi_thread")]
async fn untitled_note_pushes_on_its_own() {
    let server = start_server().await;
    let laptop = device(&server).await;
    completed(laptop.login("user-1", &token()).await.unwrap());
    let note = laptop
        .store()
        .create_note("", "body only", false)
        .await
        .unwrap();

    let outcome = laptop.sync_single_note(&note.id).await;
    assert_eq!(
        outcome,
        NoteSyncOutcome::Pushed {
            server_id: Some(note.id.as_str()),
            settled: true,
        }
    );

    let retention = Duration::from_secs(30 * 24 * 3_600);
    let lifecycle = laptop.lifecycle(retention);
    lifecycle.soft_delete(&note.id).await.unwrap();
    lifecycle.restore(&note.id).await.unwrap();

    let remote = server
        .store
        .get("user-1", &note.id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remote.title, "");
    assert!(!remote.temp_delete);
    let local = laptop.store().get_note(&note.id).await.unwrap().unwrap();
    assert!(!local.needs_sync);
}

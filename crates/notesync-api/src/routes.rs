use std::hash::{Hash, Hasher};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use notesync_core::models::normalize_remote_id;
use notesync_core::storage::{artifact_path, ContentStore, FsContentStore, PendingArtifact};
use notesync_core::sync::protocol::{
    conflict_reason, ClientNote, CreateNoteRequest, DeletedNote, DeletedNotesFeed,
    MessageResponse, NoteListResponse, ServerNote, SyncConflict, SyncRequest, SyncResponse,
    TrashListResponse, TrashedNote, UpdateNoteRequest,
};
use notesync_core::sync::timestamp::{format_seconds, parse_seconds, parse_seconds_or_now};
use notesync_core::NoteId;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};
use crate::store::{NotePatch, NoteUpsert, RemoteStore, StoredNote};

/// Request bodies carry whole note contents.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: RemoteStore,
    jwt_verifier: Arc<JwtVerifier>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: RemoteStore) -> Self {
        Self {
            jwt_verifier: Arc::new(JwtVerifier::new(&config)),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(&config)),
            store,
            config,
        }
    }

    pub fn rate_limiter(&self) -> &EndpointRateLimiter {
        &self.endpoint_rate_limiter
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/notes", get(list_notes).post(create_note))
        .route("/notes/sync", post(sync_notes))
        .route("/notes/trash/all", get(list_trash))
        .route("/notes/trash/sync", get(deleted_feed))
        .route("/notes/trash/{id}", delete(purge_note))
        .route("/notes/trash/{id}/restore", post(restore_note))
        .route(
            "/notes/{id}",
            get(get_note).put(update_note).delete(trash_note),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn sync_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Sync, &user.user_id)
        .await?;

    let now = Utc::now().timestamp();
    let cursor = request
        .last_sync_time
        .as_deref()
        .map(|value| parse_seconds_or_now(Some(value)));
    let content = state.store.content_for(&user.user_id);

    let mut synced = Vec::with_capacity(request.notes.len());
    let mut conflicts = Vec::new();
    for note in &request.notes {
        match merge_client_note(&state.store, &content, &user.user_id, note, now).await {
            Ok(id) => synced.push(id),
            Err(conflict) => conflicts.push(conflict),
        }
    }

    let changed = state.store.changed_since(&user.user_id, cursor).await?;
    let mut server_notes = Vec::with_capacity(changed.len());
    for note in &changed {
        server_notes.push(render_note(&content, note).await?);
    }

    tracing::info!(
        endpoint = "sync",
        user = user_fingerprint(&user.user_id),
        pushed = request.notes.len(),
        returned = server_notes.len(),
        conflicts = conflicts.len(),
        full_fetch = cursor.is_none(),
        "Merged notes"
    );
    Ok(Json(SyncResponse {
        server_notes,
        conflicts,
        synced,
        sync_time: format_seconds(now),
    }))
}

/// Upsert one pushed note. Failures become conflicts and never abort the batch.
async fn merge_client_note(
    store: &RemoteStore,
    content: &FsContentStore,
    user_id: &str,
    note: &ClientNote,
    now: i64,
) -> Result<String, SyncConflict> {
    let id = normalize_remote_id(&note.id);
    if artifact_path(&id).is_err() {
        return Err(conflict(&note.id, conflict_reason::INVALID_NOTE));
    }

    let artifact = content
        .write_pending(&id, note.content.as_bytes())
        .await
        .map_err(|error| {
            tracing::warn!("Failed to write content for pushed note: {error}");
            conflict(&note.id, conflict_reason::CONTENT_WRITE_FAILED)
        })?;

    let created = note.created_at.as_deref().and_then(parse_seconds);
    let updated_at = note
        .updated_at
        .as_deref()
        .and_then(parse_seconds)
        .or(created)
        .unwrap_or(now);
    let upsert = NoteUpsert {
        id: &id,
        title: &note.title,
        content_path: artifact.path(),
        is_draft: note.is_draft,
        temp_delete: note.temp_delete,
        created_at: created.unwrap_or(updated_at),
        updated_at,
    };
    if let Err(error) = store.upsert(user_id, &upsert, now).await {
        tracing::warn!("Failed to store pushed note: {error}");
        revert_artifact(artifact).await;
        return Err(conflict(&note.id, conflict_reason::SYNC_ERROR));
    }
    artifact.keep().await;
    Ok(id)
}

async fn revert_artifact(artifact: PendingArtifact) {
    if let Err(error) = artifact.revert().await {
        tracing::error!("Failed to roll back content artifact: {error}");
    }
}

fn conflict(note_id: &str, reason: &str) -> SyncConflict {
    SyncConflict {
        note_id: note_id.to_string(),
        reason: reason.to_string(),
        server_note: None,
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    include_deleted: Option<bool>,
}

async fn list_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<NoteListResponse>, AppError> {
    let stored = state
        .store
        .list(&user.user_id, query.include_deleted.unwrap_or(false))
        .await?;
    let content = state.store.content_for(&user.user_id);
    let mut notes = Vec::with_capacity(stored.len());
    for note in &stored {
        notes.push(render_note(&content, note).await?);
    }
    Ok(Json(NoteListResponse { notes }))
}

async fn get_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<ServerNote>, AppError> {
    let note = state
        .store
        .get(&user.user_id, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Note not found"))?;
    let content = state.store.content_for(&user.user_id);
    Ok(Json(render_note(&content, &note).await?))
}

async fn create_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<CreateNoteRequest>,
) -> Result<(StatusCode, Json<ServerNote>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::NoteWrite, &user.user_id)
        .await?;

    let title = request.title.trim();
    let id = request
        .id
        .as_deref()
        .map(normalize_remote_id)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| NoteId::new().as_str());
    if artifact_path(&id).is_err() {
        return Err(AppError::bad_request("note id is not valid"));
    }

    let content = state.store.content_for(&user.user_id);
    let artifact = content.write_pending(&id, request.content.as_bytes()).await?;
    let stored = state
        .store
        .create_or_replace(
            &user.user_id,
            &id,
            title,
            artifact.path(),
            request.is_draft,
            Utc::now().timestamp(),
        )
        .await;
    let note = match stored {
        Ok(note) => {
            artifact.keep().await;
            note
        }
        Err(error) => {
            revert_artifact(artifact).await;
            return Err(error.into());
        }
    };

    tracing::debug!(
        endpoint = "create_note",
        user = user_fingerprint(&user.user_id),
        "Stored note"
    );
    Ok((StatusCode::CREATED, Json(render_note(&content, &note).await?)))
}

async fn update_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(request): Json<UpdateNoteRequest>,
) -> Result<Json<ServerNote>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::NoteWrite, &user.user_id)
        .await?;

    let title = request.title.as_deref().map(str::trim);
    let existing = state
        .store
        .get(&user.user_id, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Note not found"))?;

    let content = state.store.content_for(&user.user_id);
    let artifact = match &request.content {
        Some(body) => Some(content.write_pending(&existing.id, body.as_bytes()).await?),
        None => None,
    };

    let patch = NotePatch {
        title,
        is_draft: request.is_draft,
        content_changed: request.content.is_some(),
    };
    let updated = state
        .store
        .update(&user.user_id, &existing.id, &patch, Utc::now().timestamp())
        .await;
    let note = match (updated, artifact) {
        (Ok(Some(note)), artifact) => {
            if let Some(artifact) = artifact {
                artifact.keep().await;
            }
            note
        }
        (Ok(None), artifact) => {
            if let Some(artifact) = artifact {
                revert_artifact(artifact).await;
            }
            return Err(AppError::not_found("Note not found"));
        }
        (Err(error), artifact) => {
            if let Some(artifact) = artifact {
                revert_artifact(artifact).await;
            }
            return Err(error.into());
        }
    };
    Ok(Json(render_note(&content, &note).await?))
}

async fn trash_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::NoteWrite, &user.user_id)
        .await?;

    if !state
        .store
        .set_trashed(&user.user_id, &id, true, Utc::now().timestamp())
        .await?
    {
        return Err(AppError::not_found("Note not found"));
    }
    Ok(message("Note moved to trash"))
}

async fn restore_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::NoteWrite, &user.user_id)
        .await?;

    if !state
        .store
        .set_trashed(&user.user_id, &id, false, Utc::now().timestamp())
        .await?
    {
        return Err(AppError::not_found("Deleted note not found"));
    }
    Ok(message("Note restored successfully"))
}

async fn purge_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::NoteWrite, &user.user_id)
        .await?;

    let note = state
        .store
        .purge(&user.user_id, &id, Utc::now().timestamp())
        .await?
        .ok_or_else(|| AppError::not_found("Deleted note not found"))?;

    let content = state.store.content_for(&user.user_id);
    if let Err(error) = content.delete(&note.content_path).await {
        tracing::warn!("Failed to delete content of purged note: {error}");
    }
    tracing::info!(
        endpoint = "purge_note",
        user = user_fingerprint(&user.user_id),
        "Purged note"
    );
    Ok(message("Note permanently deleted"))
}

async fn list_trash(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<TrashListResponse>, AppError> {
    let stored = state.store.list_trash(&user.user_id).await?;
    let content = state.store.content_for(&user.user_id);
    let mut notes = Vec::with_capacity(stored.len());
    for note in stored {
        notes.push(TrashedNote {
            content: Some(content.read_text(&note.content_path).await?),
            deleted_at: format_seconds(note.updated_at),
            id: note.id,
            title: note.title,
        });
    }
    Ok(Json(TrashListResponse { notes }))
}

#[derive(Debug, Deserialize)]
struct FeedQuery {
    #[serde(rename = "lastSyncTime")]
    last_sync_time: Option<String>,
}

async fn deleted_feed(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<DeletedNotesFeed>, AppError> {
    let now = Utc::now().timestamp();
    let cursor = query
        .last_sync_time
        .as_deref()
        .map(|value| parse_seconds_or_now(Some(value)));
    let deleted_notes = state
        .store
        .deleted_since(&user.user_id, cursor)
        .await?
        .into_iter()
        .map(|tombstone| DeletedNote {
            id: tombstone.id,
            deleted_at: format_seconds(tombstone.deleted_at),
        })
        .collect();
    Ok(Json(DeletedNotesFeed {
        deleted_notes,
        last_sync_time: format_seconds(now),
    }))
}

async fn render_note(content: &FsContentStore, note: &StoredNote) -> Result<ServerNote, AppError> {
    Ok(ServerNote {
        id: note.id.clone(),
        title: note.title.clone(),
        content: Some(content.read_text(&note.content_path).await?),
        is_draft: note.is_draft,
        temp_delete: note.temp_delete,
        created_at: Some(format_seconds(note.created_at)),
        updated_at: Some(format_seconds(note.updated_at)),
        synced_at: note.synced_at.map(format_seconds),
    })
}

fn message(text: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.to_string(),
    })
}

pub(crate) fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request as HttpRequest};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::sign_test_token;
    use crate::config::test_config;

    struct Harness {
        router: Router,
        state: AppState,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(dir.path().join("content")));
        let store = RemoteStore::open_in_memory(config.content_dir.clone())
            .await
            .unwrap();
        let state = AppState::new(config, store);
        Harness {
            router: app_router(state.clone()),
            state,
            _dir: dir,
        }
    }

    fn token_for(user_id: &str) -> String {
        sign_test_token(
            "test-secret-with-enough-bytes",
            &json!({ "sub": user_id, "exp": Utc::now().timestamp() + 3_600 }),
        )
    }

    impl Harness {
        async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            self.send_as("user-1", method, uri, body).await
        }

        async fn send_as(
            &self,
            user_id: &str,
            method: Method,
            uri: &str,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let builder = HttpRequest::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", token_for(user_id)));
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }
    }

    fn client_note(id: &str, title: &str, content: &str) -> Value {
        json!({
            "id": id,
            "title": title,
            "content": content,
            "is_draft": false,
            "temp_delete": 0,
            "created_at": "2024-05-01 10:00:00",
            "updated_at": "2024-05-01 10:05:00",
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn healthz_is_public() {
        let harness = harness().await;
        let request = HttpRequest::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let response = harness.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["rate_limit"]["sync_allowed"], 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn protected_routes_require_bearer_token() {
        let harness = harness().await;
        let request = HttpRequest::builder()
            .uri("/notes")
            .body(Body::empty())
            .unwrap();
        let response = harness.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_sync_stores_pushed_notes_and_echoes_them() {
        let harness = harness().await;
        let (status, body) = harness
            .send(
                Method::POST,
                "/notes/sync",
                Some(json!({ "notes": [client_note("ABC-1", "Groceries", "milk")] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["synced"], json!(["abc-1"]));
        assert_eq!(body["conflicts"], json!([]));
        assert_eq!(body["serverNotes"][0]["id"], "abc-1");
        assert_eq!(body["serverNotes"][0]["content"], "milk");
        assert_eq!(body["serverNotes"][0]["temp_delete"], 0);
        assert_eq!(body["serverNotes"][0]["updated_at"], "2024-05-01 10:05:00");
        assert!(body["serverNotes"][0]["synced_at"].is_string());
        assert!(parse_seconds(body["syncTime"].as_str().unwrap()).is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_ids_become_conflicts_without_failing_the_batch() {
        let harness = harness().await;
        let (status, body) = harness
            .send(
                Method::POST,
                "/notes/sync",
                Some(json!({ "notes": [
                    client_note("../escape", "bad", "x"),
                    client_note("good-1", "good", "y"),
                ] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["synced"], json!(["good-1"]));
        assert_eq!(body["conflicts"][0]["noteId"], "../escape");
        assert_eq!(body["conflicts"][0]["reason"], "invalid_note");
        assert_eq!(body["conflicts"][0]["serverNote"], Value::Null);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn incremental_sync_only_returns_recent_changes() {
        let harness = harness().await;
        let old = Utc::now().timestamp() - 600;
        let upsert = NoteUpsert {
            id: "old-1",
            title: "old",
            content_path: "old-1.note",
            is_draft: false,
            temp_delete: false,
            created_at: old,
            updated_at: old,
        };
        harness.state.store.upsert("user-1", &upsert, old).await.unwrap();

        let cursor = format_seconds(Utc::now().timestamp() - 60);
        let (status, body) = harness
            .send(
                Method::POST,
                "/notes/sync",
                Some(json!({ "notes": [], "lastSyncTime": cursor })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["serverNotes"], json!([]));

        let (_, full) = harness
            .send(Method::POST, "/notes/sync", Some(json!({ "notes": [] })))
            .await;
        assert_eq!(full["serverNotes"][0]["id"], "old-1");
        // Artifact was never written; the body reads as empty
        assert_eq!(full["serverNotes"][0]["content"], "");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn notes_are_scoped_per_user() {
        let harness = harness().await;
        harness
            .send(
                Method::POST,
                "/notes",
                Some(json!({ "id": "shared", "title": "mine", "content": "a" })),
            )
            .await;

        let (status, _) = harness
            .send_as("user-2", Method::GET, "/notes/shared", None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, listed) = harness.send_as("user-2", Method::GET, "/notes", None).await;
        assert_eq!(listed["notes"], json!([]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_update_and_fetch_single_note() {
        let harness = harness().await;
        let (status, created) = harness
            .send(
                Method::POST,
                "/notes",
                Some(json!({ "id": "NOTE-1", "title": "  Plan ", "content": "draft" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["id"], "note-1");
        assert_eq!(created["title"], "Plan");

        let (status, updated) = harness
            .send(
                Method::PUT,
                "/notes/note-1",
                Some(json!({ "content": "final", "is_draft": true })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["title"], "Plan");
        assert_eq!(updated["content"], "final");
        assert_eq!(updated["is_draft"], true);

        let (status, fetched) = harness.send(Method::GET, "/notes/note-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, updated);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn untitled_notes_are_accepted_like_the_merge_endpoint() {
        let harness = harness().await;
        let (status, created) = harness
            .send(
                Method::POST,
                "/notes",
                Some(json!({ "id": "bare", "title": "  ", "content": "body only" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["title"], "");
        assert_eq!(created["content"], "body only");

        let (status, updated) = harness
            .send(Method::PUT, "/notes/bare", Some(json!({ "title": "", "content": "v2" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["title"], "");
        assert_eq!(updated["content"], "v2");

        let (status, _) = harness
            .send(Method::PUT, "/notes/missing", Some(json!({ "title": "ok" })))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_content_write_rejects_only_that_note() {
        let harness = harness().await;
        let root = harness.state.store.content_for("user-1").root().to_path_buf();
        // A directory where the staged body would go makes the write fail
        std::fs::create_dir_all(root.join("blocked.note.tmp")).unwrap();

        let (status, body) = harness
            .send(
                Method::POST,
                "/notes/sync",
                Some(json!({ "notes": [
                    client_note("blocked", "lost", "x"),
                    client_note("sibling", "kept", "y"),
                ] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["synced"], json!(["sibling"]));
        assert_eq!(body["conflicts"][0]["noteId"], "blocked");
        assert_eq!(body["conflicts"][0]["reason"], "content_write_failed");
        assert_eq!(body["serverNotes"].as_array().unwrap().len(), 1);

        assert!(harness.state.store.get("user-1", "blocked").await.unwrap().is_none());
        let (status, _) = harness.send(Method::GET, "/notes/blocked", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, sibling) = harness.send(Method::GET, "/notes/sibling", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sibling["content"], "y");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trash_restore_and_purge_round_trip() {
        let harness = harness().await;
        harness
            .send(
                Method::POST,
                "/notes",
                Some(json!({ "id": "n1", "title": "gone", "content": "bye" })),
            )
            .await;

        let (status, _) = harness.send(Method::DELETE, "/notes/trash/n1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "only trashed notes can be purged");

        let (status, body) = harness.send(Method::DELETE, "/notes/n1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Note moved to trash");

        let (_, listed) = harness.send(Method::GET, "/notes", None).await;
        assert_eq!(listed["notes"], json!([]));
        let (_, all) = harness
            .send(Method::GET, "/notes?include_deleted=true", None)
            .await;
        assert_eq!(all["notes"][0]["temp_delete"], 1);

        let (_, trash) = harness.send(Method::GET, "/notes/trash/all", None).await;
        assert_eq!(trash["notes"][0]["id"], "n1");
        assert_eq!(trash["notes"][0]["content"], "bye");

        let (status, _) = harness
            .send(Method::POST, "/notes/trash/n1/restore", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = harness
            .send(Method::POST, "/notes/trash/n1/restore", None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        harness.send(Method::DELETE, "/notes/n1", None).await;
        let (status, body) = harness.send(Method::DELETE, "/notes/trash/n1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Note permanently deleted");

        let artifact = harness.state.store.content_for("user-1").root().join("n1.note");
        assert!(!artifact.exists());
        let (status, _) = harness.send(Method::GET, "/notes/n1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, feed) = harness.send(Method::GET, "/notes/trash/sync", None).await;
        assert_eq!(feed["deletedNotes"][0]["id"], "n1");
        assert!(feed["lastSyncTime"].is_string());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deletion_feed_honours_cursor() {
        let harness = harness().await;
        let cursor = format_seconds(Utc::now().timestamp() + 60);
        let uri = format!(
            "/notes/trash/sync?lastSyncTime={}",
            cursor.replace(' ', "%20")
        );
        let (status, feed) = harness.send(Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(feed["deletedNotes"], json!([]));
    }

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        assert_eq!(user_fingerprint("user-1"), user_fingerprint("user-1"));
        assert_ne!(user_fingerprint("user-1"), user_fingerprint("user-2"));
    }
}

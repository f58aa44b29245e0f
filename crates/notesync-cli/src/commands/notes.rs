use chrono::Utc;
use notesync_core::sync::NoteSyncOutcome;
use notesync_core::{NoteEdit, NoteId};
use serde::Serialize;

use crate::app::App;
use crate::commands::common::{
    capture_editor_input_with_initial, derive_title, format_note_line, format_timestamp,
    note_to_list_item, resolve_note, resolve_note_content, NoteListItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct NoteDetail {
    #[serde(flatten)]
    item: NoteListItem,
    content: String,
    synced_at: Option<i64>,
}

pub async fn run_new(
    app: &App,
    title: Option<&str>,
    draft: bool,
    content_parts: &[String],
) -> Result<(), CliError> {
    let content = resolve_note_content(content_parts)?;
    let title = title.map_or_else(|| derive_title(&content), str::to_string);

    let note = app.store().create_note(&title, &content, draft).await?;
    push_if_signed_in(app, &note.id).await;
    println!("{}", note.id);
    Ok(())
}

pub async fn run_edit(
    app: &App,
    id: &str,
    title: Option<String>,
    draft: bool,
    finalize: bool,
) -> Result<(), CliError> {
    let note = resolve_note(app.store(), id).await?;

    let is_draft = if draft {
        Some(true)
    } else if finalize {
        Some(false)
    } else {
        None
    };
    let mut edit = NoteEdit {
        title,
        content: None,
        is_draft,
    };

    if edit.is_empty() {
        // Keep scheduled syncs off this note while the editor is open
        let _viewing = app.coordinator.begin_viewing();
        let body = app.store().read_body(&note).await?;
        let Some(edited) = capture_editor_input_with_initial(&body)? else {
            return Err(CliError::EmptyEditedContent);
        };
        edit.content = Some(edited);
    }

    let updated = app.store().update_note(&note.id, &edit).await?;
    if updated.needs_sync {
        push_if_signed_in(app, &updated.id).await;
    }
    println!("{}", updated.id);
    Ok(())
}

pub async fn run_list(app: &App, limit: usize, as_json: bool) -> Result<(), CliError> {
    let notes = app.store().list_notes(limit, 0).await?;

    if as_json {
        let mut items = Vec::with_capacity(notes.len());
        for note in &notes {
            let body = app.store().read_body(note).await?;
            items.push(note_to_list_item(note, &body));
        }
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if notes.is_empty() {
        println!("No notes yet.");
        return Ok(());
    }
    let now_ms = Utc::now().timestamp_millis();
    for note in &notes {
        println!("{}", format_note_line(note, now_ms));
    }
    Ok(())
}

pub async fn run_show(app: &App, id: &str, as_json: bool) -> Result<(), CliError> {
    let note = resolve_note(app.store(), id).await?;
    let body = app.store().read_body(&note).await?;

    if as_json {
        let detail = NoteDetail {
            item: note_to_list_item(&note, &body),
            content: body,
            synced_at: note.synced_at,
        };
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    println!("# {}", note.display_title());
    println!("id:       {}", note.id);
    if let Some(server_id) = &note.server_id {
        println!("server:   {server_id}");
    }
    println!("updated:  {}", format_timestamp(note.updated_at));
    let mut flags = Vec::new();
    if note.is_draft {
        flags.push("draft");
    }
    if note.temp_delete {
        flags.push("trashed");
    }
    if note.needs_sync {
        flags.push("pending sync");
    }
    if !flags.is_empty() {
        println!("flags:    {}", flags.join(", "));
    }
    println!();
    println!("{body}");
    Ok(())
}

/// Best-effort immediate push of one note; the next batch pass retries failures.
pub async fn push_if_signed_in(app: &App, id: &NoteId) {
    if !app.settings.is_configured() {
        return;
    }
    match app.coordinator.is_authenticated().await {
        Ok(true) => {}
        Ok(false) => return,
        Err(error) => {
            tracing::warn!("Failed to read session: {error}");
            return;
        }
    }

    match app.coordinator.sync_single_note(id).await {
        NoteSyncOutcome::Pushed { settled, .. } => {
            tracing::debug!("Pushed note {id} (settled: {settled})");
        }
        NoteSyncOutcome::Skipped(reason) => tracing::debug!("Push of {id} skipped: {reason:?}"),
        NoteSyncOutcome::Failed(message) => {
            tracing::warn!("Note {id} saved locally; push failed: {message}");
        }
    }
}

use chrono::Utc;
use serde::Serialize;

use crate::app::App;
use crate::commands::common::{
    body_preview, format_relative_time, note_to_list_item, resolve_note, NoteListItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct RemoteTrashItem {
    id: String,
    title: String,
    preview: String,
    deleted_at: String,
}

pub async fn run_delete(app: &App, id: &str) -> Result<(), CliError> {
    let note = resolve_note(app.store(), id).await?;
    let trashed = app.lifecycle().soft_delete(&note.id).await?;
    println!("{}", trashed.id);
    Ok(())
}

pub async fn run_restore(app: &App, id: &str) -> Result<(), CliError> {
    let note = resolve_note(app.store(), id).await?;
    let restored = app.lifecycle().restore(&note.id).await?;
    println!("{}", restored.id);
    Ok(())
}

/// Permanent deletion. A synced note is only removed locally once the server
/// has dropped it too.
pub async fn run_purge(app: &App, id: &str) -> Result<(), CliError> {
    let note = resolve_note(app.store(), id).await?;
    app.lifecycle().purge(&note.id).await?;
    println!("{}", note.id);
    Ok(())
}

pub async fn run_trash(app: &App, remote: bool, as_json: bool) -> Result<(), CliError> {
    if remote {
        return run_remote_trash(app, as_json).await;
    }

    // Opening the trash purges what has outlived the retention window
    match app.lifecycle().sweep_expired().await {
        Ok(report) if report.failed > 0 => {
            tracing::warn!("{} expired notes could not be purged", report.failed);
        }
        Ok(_) => {}
        Err(error) => tracing::warn!("Trash sweep failed: {error}"),
    }

    let notes = app.store().list_trash().await?;
    if as_json {
        let mut items = Vec::with_capacity(notes.len());
        for note in &notes {
            let body = app.store().read_body(note).await?;
            items.push(note_to_list_item(note, &body));
        }
        println!("{}", serde_json::to_string_pretty::<Vec<NoteListItem>>(&items)?);
        return Ok(());
    }

    if notes.is_empty() {
        println!("Trash is empty.");
        return Ok(());
    }
    let now_ms = Utc::now().timestamp_millis();
    for note in &notes {
        let id = note.id.to_string();
        let short_id = id.chars().take(13).collect::<String>();
        println!(
            "{short_id:<13}  {:<40}  trashed {}",
            note.display_title(),
            format_relative_time(note.updated_at, now_ms)
        );
    }
    Ok(())
}

async fn run_remote_trash(app: &App, as_json: bool) -> Result<(), CliError> {
    app.require_remote()?;
    if app.store().current_session().await?.is_none() {
        return Err(CliError::NotSignedIn);
    }

    let notes = app.coordinator.remote_trash().await?;
    let items = notes
        .into_iter()
        .map(|note| RemoteTrashItem {
            preview: body_preview(note.content.as_deref().unwrap_or_default(), 80),
            id: note.id,
            title: note.title,
            deleted_at: note.deleted_at,
        })
        .collect::<Vec<_>>();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("Remote trash is empty.");
    } else {
        for item in &items {
            println!("{:<36}  {:<40}  {}", item.id, item.title, item.deleted_at);
        }
    }
    Ok(())
}

pub async fn run_sweep(app: &App) -> Result<(), CliError> {
    let report = app.lifecycle().sweep_expired().await?;
    println!("Purged {} expired notes", report.purged);
    if report.failed > 0 {
        eprintln!(
            "{} notes could not be purged and stay in the trash",
            report.failed
        );
    }
    Ok(())
}

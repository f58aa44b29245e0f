use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use notesync_core::storage::ContentStore;
use notesync_core::{Note, NoteId, NoteStore};
use serde::Serialize;

use crate::error::CliError;

const PAGE_SIZE: usize = 500;
const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub server_id: Option<String>,
    pub title: String,
    pub preview: String,
    pub is_draft: bool,
    pub trashed: bool,
    pub needs_sync: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
}

pub fn note_to_list_item(note: &Note, body: &str) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id.to_string(),
        server_id: note.server_id.clone(),
        title: note.display_title().to_string(),
        preview: body_preview(body, 80),
        is_draft: note.is_draft,
        trashed: note.temp_delete,
        needs_sync: note.needs_sync,
        created_at: note.created_at,
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.updated_at, now_ms),
    }
}

pub fn format_note_line(note: &Note, now_ms: i64) -> String {
    let id = note.id.to_string();
    let short_id = id.chars().take(13).collect::<String>();
    let title = truncate_chars(note.display_title(), 40);
    let relative_time = format_relative_time(note.updated_at, now_ms);

    let mut markers = Vec::new();
    if note.is_draft {
        markers.push("draft");
    }
    if note.needs_sync {
        markers.push("pending");
    }

    if markers.is_empty() {
        format!("{short_id:<13}  {title:<40}  {relative_time}")
    } else {
        format!(
            "{short_id:<13}  {title:<40}  {relative_time:<10}  [{}]",
            markers.join(", ")
        )
    }
}

/// Every local note, active ones first, then the trash.
pub async fn all_notes<C: ContentStore>(store: &NoteStore<C>) -> Result<Vec<Note>, CliError> {
    let mut notes = Vec::new();
    let mut offset = 0usize;
    loop {
        let batch = store.list_notes(PAGE_SIZE, offset).await?;
        let count = batch.len();
        notes.extend(batch);
        if count < PAGE_SIZE {
            break;
        }
        offset += count;
    }
    notes.extend(store.list_trash().await?);
    Ok(notes)
}

/// Resolve a full note id or a unique prefix of one.
pub async fn resolve_note<C: ContentStore>(
    store: &NoteStore<C>,
    query: &str,
) -> Result<Note, CliError> {
    let query = normalize_note_identifier(query)?;
    if let Ok(note_id) = query.parse::<NoteId>() {
        if let Some(note) = store.get_note(&note_id).await? {
            return Ok(note);
        }
    }

    let prefix = query.to_ascii_lowercase();
    let mut matching = all_notes(store)
        .await?
        .into_iter()
        .filter(|note| note.id.as_str().starts_with(&prefix))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::NoteNotFound(query)),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|note| note.id.as_str().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousNoteId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn body_preview(body: &str, max_chars: usize) -> String {
    let first_line = body.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = text.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

/// Title for a note created without one: its first non-empty line.
pub fn derive_title(content: &str) -> String {
    let first_line = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    let title = first_line.trim_start_matches('#').trim();
    truncate_chars(title, TITLE_MAX_CHARS)
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input_with_initial("")? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyNoteId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_note_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let note_content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&note_content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        ))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            // EDITOR may carry arguments, e.g. "code --wait"
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let status = Command::new(program).args(parts).arg(file_path).status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_note_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("notesync-note-{}-{now}.md", std::process::id()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("NOTESYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("notesync")
        .join("notesync.db")
}

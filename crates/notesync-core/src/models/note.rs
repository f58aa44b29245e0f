//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A client-generated local identifier for a note, using UUID v7 (time-sortable)
///
/// Rendered lowercase; parsing accepts any casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteId(Uuid);

impl NoteId {
    /// Create a new unique note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the lowercase string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Position of a note in the deletion lifecycle.
///
/// `Purged` is terminal and has no row, so it is never observed on a loaded note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteState {
    Active,
    Trashed,
}

/// A note in the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Immutable local identifier
    pub id: NoteId,
    /// Identifier assigned by the remote store, lowercase
    pub server_id: Option<String>,
    /// User-visible title
    pub title: String,
    /// Reference to the content artifact holding the body
    pub content_path: String,
    /// "Unfinished" marker; does not affect sync eligibility
    pub is_draft: bool,
    /// In trash when true
    pub temp_delete: bool,
    /// Local state diverged from the last known remote state
    pub needs_sync: bool,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Last successful reconciliation (Unix ms)
    pub synced_at: Option<i64>,
}

impl Note {
    /// Create a new, unsynced note whose body lives at `content_path`
    #[must_use]
    pub fn new(title: impl Into<String>, content_path: impl Into<String>, is_draft: bool) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: NoteId::new(),
            server_id: None,
            title: normalize_title(&title.into()),
            content_path: content_path.into(),
            is_draft,
            temp_delete: false,
            needs_sync: true,
            created_at: now,
            updated_at: now,
            synced_at: None,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> NoteState {
        if self.temp_delete {
            NoteState::Trashed
        } else {
            NoteState::Active
        }
    }

    /// Identifier transmitted to the remote store: the server id once known,
    /// otherwise the lowercase local id.
    #[must_use]
    pub fn remote_id(&self) -> String {
        self.server_id
            .as_deref()
            .map_or_else(|| self.id.as_str(), str::to_ascii_lowercase)
    }

    /// Whether this note carries the given remote identifier (case-insensitive)
    #[must_use]
    pub fn matches_remote_id(&self, remote_id: &str) -> bool {
        self.server_id
            .as_deref()
            .is_some_and(|server_id| server_id.eq_ignore_ascii_case(remote_id))
    }

    /// Get title for display, falling back to a placeholder when empty
    #[must_use]
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            "Untitled"
        } else {
            &self.title
        }
    }
}

/// Partial edit applied by the user; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteEdit {
    pub title: Option<String>,
    pub content: Option<String>,
    pub is_draft: Option<bool>,
}

impl NoteEdit {
    /// Whether the edit touches nothing
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.is_draft.is_none()
    }
}

/// Trim surrounding whitespace from a title
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title.trim().to_string()
}

/// Normalize a remote identifier (trimmed, lowercase)
#[must_use]
pub fn normalize_remote_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_id_unique() {
        let id1 = NoteId::new();
        let id2 = NoteId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_note_id_parse_is_case_insensitive() {
        let id = NoteId::new();
        let parsed: NoteId = id.as_str().to_ascii_uppercase().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(parsed.as_str(), parsed.as_str().to_ascii_lowercase());
    }

    #[test]
    fn test_note_new_needs_sync() {
        let note = Note::new("  Groceries ", "notes/a.note", false);
        assert_eq!(note.title, "Groceries");
        assert!(note.needs_sync);
        assert!(!note.temp_delete);
        assert_eq!(note.state(), NoteState::Active);
        assert_eq!(note.created_at, note.updated_at);
        assert!(note.server_id.is_none());
    }

    #[test]
    fn test_remote_id_prefers_server_id() {
        let mut note = Note::new("t", "p", false);
        assert_eq!(note.remote_id(), note.id.as_str());

        note.server_id = Some("ABC123".to_string());
        assert_eq!(note.remote_id(), "abc123");
        assert!(note.matches_remote_id("abc123"));
        assert!(note.matches_remote_id("AbC123"));
        assert!(!note.matches_remote_id("other"));
    }

    #[test]
    fn test_display_title_placeholder() {
        let note = Note::new("   ", "p", true);
        assert_eq!(note.display_title(), "Untitled");
    }
}

//! Data models for notesync

mod note;
mod session;

pub use note::{normalize_remote_id, normalize_title, Note, NoteEdit, NoteId, NoteState};
pub use session::Session;

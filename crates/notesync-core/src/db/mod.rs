//! Local store persistence

mod connection;
mod migrations;
mod repository;
mod session_repository;

pub use connection::Database;
pub use repository::{LibSqlNoteRepository, NoteRepository};
pub use session_repository::{LibSqlSessionRepository, SessionRepository};

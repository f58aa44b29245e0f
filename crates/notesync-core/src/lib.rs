//! notesync-core - Core library for notesync
//!
//! This crate contains the local note store, the content artifact store, the
//! sync wire protocol, and the engine that keeps the local store converged
//! with the remote one (reconciliation, coordination and the trash lifecycle).

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Note, NoteEdit, NoteId, NoteState, Session};
pub use services::NoteStore;

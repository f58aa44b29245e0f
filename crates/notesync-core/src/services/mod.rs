//! Services shared by every client of the local store.

mod note_store;

pub use note_store::NoteStore;

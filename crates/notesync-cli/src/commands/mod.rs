pub mod common;
pub mod notes;
pub mod sync;
pub mod trash;

//! In-memory content artifacts with failure injection, for tests and previews.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{artifact_path, ContentStore};
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    artifacts: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentStore for MemoryContentStore {
    async fn write(&self, note_id: &str, bytes: &[u8]) -> Result<String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!(
                "write for {note_id} rejected by memory store"
            )));
        }
        let path = artifact_path(note_id)?;
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("content artifact {path}")))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        Ok(())
    }
}

//! Process-local store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::{BackingStore, Result, StorageError, StorePath};

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<StorePath, Vec<u8>>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `write` calls served so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<StorePath> {
        let mut keys: Vec<_> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl BackingStore for MemoryStore {
    fn read_all(&self, path: &StorePath) -> Result<Vec<u8>> {
        self.objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.clone()))
    }

    fn write(&self, path: &StorePath, bytes: &[u8]) -> Result<()> {
        self.objects.write().insert(path.clone(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn exists(&self, path: &StorePath) -> bool {
        self.objects.read().contains_key(path)
    }
}

//! Store-backed cord generic over its commit strategy.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use super::{Cord, FieldMatch};
use crate::Document;
use crate::storage::{BackingStore, Result, StorageError, StorePath};
use crate::tables::IndexedTable;

/// When mutations of a [`StoredCord`] reach the backing store.
pub trait CommitStrategy: Send + Sync + 'static {
    const NAME: &'static str;
    /// Persist before each mutating call returns.
    const WRITE_THROUGH: bool;
}

/// Persist only on `commit`/`close`.
#[derive(Debug)]
pub struct Deferred;

/// Persist after every mutation.
#[derive(Debug)]
pub struct WriteThrough;

impl CommitStrategy for Deferred {
    const NAME: &'static str = "volatile";
    const WRITE_THROUGH: bool = false;
}

impl CommitStrategy for WriteThrough {
    const NAME: &'static str = "durable";
    const WRITE_THROUGH: bool = true;
}

pub type VolatileCord = StoredCord<Deferred>;
pub type DurableCord = StoredCord<WriteThrough>;

#[derive(Debug, Default)]
struct CordState {
    documents: Option<Vec<Document>>,
    dirty: bool,
}

pub struct StoredCord<P: CommitStrategy> {
    store: Arc<dyn BackingStore>,
    path: StorePath,
    state: Mutex<CordState>,
    _strategy: PhantomData<P>,
}

impl<P: CommitStrategy> std::fmt::Debug for StoredCord<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StoredCord")
            .field("strategy", &P::NAME)
            .field("path", &self.path)
            .field("loaded", &state.documents.as_ref().map(Vec::len))
            .field("dirty", &state.dirty)
            .finish()
    }
}

impl<P: CommitStrategy> StoredCord<P> {
    /// Bind a cord to `path`. Nothing is read until first use.
    pub fn open(store: Arc<dyn BackingStore>, path: StorePath) -> Self {
        Self {
            store,
            path,
            state: Mutex::new(CordState::default()),
            _strategy: PhantomData,
        }
    }

    /// Append every table row as one document.
    pub fn append_table(&self, table: &IndexedTable) -> Result<()> {
        let rows: Vec<Document> = table
            .to_json()
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|row| row.as_object().cloned())
            .collect();
        self.append_all(rows)
    }

    fn ensure_loaded<'s>(&self, state: &'s mut CordState) -> Result<&'s mut Vec<Document>> {
        if state.documents.is_none() {
            let start = Instant::now();
            let documents: Vec<Document> = match self.store.read_all(&self.path) {
                Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
                Ok(bytes) => serde_json::from_slice(&bytes)?,
                Err(StorageError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            };
            debug!(
                path = %self.path,
                strategy = P::NAME,
                documents = documents.len(),
                elapsed_ms = start.elapsed().as_millis(),
                "loaded cord"
            );
            state.documents = Some(documents);
        }
        Ok(state.documents.get_or_insert_with(Vec::new))
    }

    fn persist(&self, state: &mut CordState) -> Result<bool> {
        if !state.dirty {
            return Ok(false);
        }
        if let Some(documents) = state.documents.as_ref() {
            let bytes = serde_json::to_vec(documents)?;
            self.store.write(&self.path, &bytes)?;
            debug!(path = %self.path, documents = documents.len(), "committed cord");
        }
        state.dirty = false;
        Ok(true)
    }

    fn read<T>(&self, f: impl FnOnce(&[Document]) -> T) -> Result<T> {
        let mut state = self.state.lock();
        let documents = self.ensure_loaded(&mut state)?;
        Ok(f(documents))
    }

    /// Run `f` under the lock; `f` reports whether it changed the sequence.
    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<Document>) -> (T, bool)) -> Result<T> {
        let mut state = self.state.lock();
        let documents = self.ensure_loaded(&mut state)?;
        let (out, changed) = f(documents);
        if changed {
            state.dirty = true;
            if P::WRITE_THROUGH {
                self.persist(&mut state)?;
            }
        }
        Ok(out)
    }
}

impl<P: CommitStrategy> Cord for StoredCord<P> {
    fn path(&self) -> &StorePath {
        &self.path
    }

    fn len(&self) -> Result<usize> {
        self.read(<[Document]>::len)
    }

    fn get(&self, index: usize) -> Result<Option<Document>> {
        self.read(|docs| docs.get(index).cloned())
    }

    fn snapshot(&self) -> Result<Vec<Document>> {
        self.read(<[Document]>::to_vec)
    }

    fn append(&self, document: Document) -> Result<()> {
        self.mutate(|docs| {
            docs.push(document);
            ((), true)
        })
    }

    fn append_all(&self, documents: Vec<Document>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        self.mutate(|docs| {
            docs.extend(documents);
            ((), true)
        })
    }

    fn prepend(&self, document: Document) -> Result<()> {
        self.insert(document, 0)
    }

    fn insert(&self, document: Document, index: usize) -> Result<()> {
        self.mutate(|docs| {
            if index > docs.len() {
                let len = docs.len();
                return (Err(StorageError::OutOfBounds { index, len }), false);
            }
            docs.insert(index, document);
            (Ok(()), true)
        })?
    }

    fn remove(&self, index: usize) -> Result<Option<Document>> {
        self.mutate(|docs| {
            if index < docs.len() {
                (Some(docs.remove(index)), true)
            } else {
                (None, false)
            }
        })
    }

    fn remove_first(&self) -> Result<Option<Document>> {
        self.remove(0)
    }

    fn remove_last(&self) -> Result<Option<Document>> {
        self.mutate(|docs| {
            let last = docs.pop();
            let changed = last.is_some();
            (last, changed)
        })
    }

    fn remove_all_where(&self, key: &str, value: FieldMatch<'_>) -> Result<Vec<Document>> {
        self.mutate(|docs| {
            let mut removed = Vec::new();
            let mut kept = Vec::with_capacity(docs.len());
            for doc in docs.drain(..) {
                if value.matches(doc.get(key)) {
                    removed.push(doc);
                } else {
                    kept.push(doc);
                }
            }
            *docs = kept;
            let changed = !removed.is_empty();
            (removed, changed)
        })
    }

    fn remove_one_where(&self, key: &str, value: FieldMatch<'_>) -> Result<Option<Document>> {
        self.mutate(|docs| match docs.iter().position(|d| value.matches(d.get(key))) {
            Some(index) => (Some(docs.remove(index)), true),
            None => (None, false),
        })
    }

    fn commit(&self) -> Result<bool> {
        let mut state = self.state.lock();
        self.persist(&mut state)
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.persist(&mut state)?;
        state.documents = None;
        debug!(path = %self.path, "released cord");
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    fn is_loaded(&self) -> bool {
        self.state.lock().documents.is_some()
    }
}

//! Table repository that resolves tables from a remote peer, memory or a
//! backing store.
//!
//! Tables added locally are shared: [`PersistentTables::select`] without
//! selections hands out the live [`SharedTable`], so a caller's mutation is
//! visible to every other reader. Tables served by a peer, freshly loaded
//! from storage, or filtered by selections are private copies.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::peer::TablePeer;
use super::table::{IndexedTable, Select, parse_selects};
use crate::storage::{BackingStore, Result, StorageError, StorePath};

/// A table shared between the repository and its callers.
pub type SharedTable = Arc<RwLock<IndexedTable>>;

#[derive(Default)]
pub struct PersistentTables {
    tables: RwLock<HashMap<String, SharedTable>>,
    peer: Option<TablePeer>,
    store: Option<Arc<dyn BackingStore>>,
    base: Option<StorePath>,
}

impl std::fmt::Debug for PersistentTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentTables")
            .field("tables", &self.table_names())
            .field("peer", &self.peer.as_ref().map(TablePeer::url_prefix))
            .field("store", &self.store.is_some())
            .field("base", &self.base)
            .finish()
    }
}

impl PersistentTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve tables through a remote peer first.
    pub fn with_peer(mut self, peer: TablePeer) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Back the repository with `store`, keeping tables below `base`.
    pub fn with_store(mut self, store: Arc<dyn BackingStore>, base: StorePath) -> Self {
        self.store = Some(store);
        self.base = Some(base);
        self
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// Register `table` under `name`, replacing any previous entry.
    pub fn add_table(&self, name: &str, table: IndexedTable) -> SharedTable {
        let shared = Arc::new(RwLock::new(table));
        self.tables
            .write()
            .insert(name.to_string(), Arc::clone(&shared));
        shared
    }

    /// Register a caller-owned table by reference.
    pub fn add_shared_table(&self, name: &str, table: SharedTable) {
        self.tables.write().insert(name.to_string(), table);
    }

    /// Append `table` to the named table, creating it when absent.
    pub fn extend_table(&self, name: &str, table: IndexedTable) -> SharedTable {
        let mut tables = self.tables.write();
        match tables.get(name) {
            Some(existing) => {
                existing.write().append(&table);
                Arc::clone(existing)
            }
            None => {
                let shared = Arc::new(RwLock::new(table));
                tables.insert(name.to_string(), Arc::clone(&shared));
                shared
            }
        }
    }

    /// Write the named table as an indented JSON array to `<base>/<name>.json`.
    ///
    /// Returns `false` when no such table is registered.
    pub fn store_table(&self, name: &str) -> Result<bool> {
        let Some(table) = self.tables.read().get(name).cloned() else {
            return Ok(false);
        };
        let (store, key) = self.table_key(name)?;
        let bytes = table.read().to_json_pretty()?;
        store.write(&key, &bytes)?;
        debug!(table = name, key = %key, "stored table");
        Ok(true)
    }

    pub fn get_table(&self, name: &str) -> Result<SharedTable> {
        self.select_parsed(name, &[])
    }

    /// Resolve `name` and apply equality selections.
    ///
    /// This is the entry point for reading managed tables: it behaves the
    /// same whether the table is served by the peer or locally. Peer
    /// failures are logged and fall through to local resolution.
    pub fn select<S: AsRef<str>>(&self, name: &str, selects: &[S]) -> Result<SharedTable> {
        let selects = parse_selects(selects)?;
        self.select_parsed(name, &selects)
    }

    /// Same as [`Self::select`] with already parsed selections.
    pub fn select_parsed(&self, name: &str, selects: &[Select]) -> Result<SharedTable> {
        if let Some(peer) = &self.peer {
            match peer.fetch(name, selects) {
                Ok(table) => return Ok(Arc::new(RwLock::new(table))),
                Err(e) => debug!(table = name, error = %e, "peer fetch failed, using local copy"),
            }
        }

        let local = self.tables.read().get(name).cloned();
        let table = match local {
            Some(shared) => shared,
            None => Arc::new(RwLock::new(self.load(name)?)),
        };
        if selects.is_empty() {
            return Ok(table);
        }
        let filtered = table.read().where_selects(selects);
        Ok(Arc::new(RwLock::new(filtered)))
    }

    fn load(&self, name: &str) -> Result<IndexedTable> {
        let (store, key) = self.table_key(name)?;
        let bytes = store.read_all(&key)?;
        IndexedTable::from_json_slice(&bytes)
    }

    fn table_key(&self, name: &str) -> Result<(&Arc<dyn BackingStore>, StorePath)> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| StorageError::Configuration("no backing store defined".into()))?;
        let base = self
            .base
            .as_ref()
            .ok_or_else(|| StorageError::Configuration("no store path defined".into()))?;
        Ok((store, base.append(&format!("{name}.json"))))
    }
}

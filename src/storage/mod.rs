//! Key-addressed byte storage backing cords and tables.
//!
//! A [`BackingStore`] has read-all/write-all semantics: callers always read
//! or replace the complete object stored under a [`StorePath`]. Two
//! implementations ship with the crate:
//!
//! - **[`fs::FsStore`]**: one file per key below a root directory, replaced
//!   atomically through a temp file.
//! - **[`memory::MemoryStore`]**: a process-local map, used for volatile
//!   deployments and tests.

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use std::fmt;

use thiserror::Error;

/// Errors raised by backing stores, cords and the table repository.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no object stored at {0}")]
    NotFound(StorePath),

    #[error("i/o failure at {path}: {source}")]
    Io {
        path: StorePath,
        source: std::io::Error,
    },

    #[error("malformed JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage not configured: {0}")]
    Configuration(String),

    #[error("invalid selection `{0}`, expected key:value")]
    InvalidSelect(String),

    #[error("position {index} out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },

    #[error("table peer request failed: {0}")]
    RemoteFetch(String),
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Slash-separated key of one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath(String);

impl StorePath {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self(path.trim_matches('/').to_string())
    }

    /// Child key below this one.
    pub fn append(&self, name: &str) -> Self {
        let name = name.trim_matches('/');
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, skipping empty ones.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Read-all/write-all object store.
pub trait BackingStore: Send + Sync {
    /// Read the complete object stored at `path`.
    fn read_all(&self, path: &StorePath) -> Result<Vec<u8>>;

    /// Replace the object stored at `path`.
    fn write(&self, path: &StorePath, bytes: &[u8]) -> Result<()>;

    fn exists(&self, path: &StorePath) -> bool;
}

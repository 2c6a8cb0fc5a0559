//! Filesystem-backed store: one file per key below a root directory.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{BackingStore, Result, StorageError, StorePath};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &StorePath) -> PathBuf {
        let mut out = self.root.clone();
        for segment in path.segments() {
            // Keys never escape the root.
            if segment == ".." || segment == "." {
                continue;
            }
            out.push(segment);
        }
        out
    }
}

impl BackingStore for FsStore {
    fn read_all(&self, path: &StorePath) -> Result<Vec<u8>> {
        let file = self.resolve(path);
        std::fs::read(&file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.clone())
            } else {
                StorageError::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })
    }

    fn write(&self, path: &StorePath, bytes: &[u8]) -> Result<()> {
        let file = self.resolve(path);
        let io_err = |source| StorageError::Io {
            path: path.clone(),
            source,
        };
        let parent = file.parent().unwrap_or(self.root.as_path());
        std::fs::create_dir_all(parent).map_err(io_err)?;

        // Write next to the target and rename so readers never see a torn file.
        let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
        tmp.write_all(bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&file).map_err(|e| io_err(e.error))?;

        debug!(path = %file.display(), bytes = bytes.len(), "store write");
        Ok(())
    }

    fn exists(&self, path: &StorePath) -> bool {
        self.resolve(path).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let key = StorePath::new("nested/dir/doc.json");

        store.write(&key, b"[1,2,3]").unwrap();
        assert!(store.exists(&key));
        assert_eq!(store.read_all(&key).unwrap(), b"[1,2,3]");
        assert!(dir.path().join("nested/dir/doc.json").is_file());
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let err = store.read_all(&StorePath::new("absent.json")).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn parent_segments_stay_inside_root() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        store.write(&StorePath::new("../escape.json"), b"{}").unwrap();
        assert!(dir.path().join("escape.json").is_file());
    }
}

use std::fs;
use std::path::PathBuf;

use crate::storage::domain::record_store::{RecordStore, StoreError};

/// Flat-file [`RecordStore`] rooted at a base directory.
///
/// Each key maps to `<base>/<key>`; parent directories are created on
/// demand. Writes go to a `.part` sibling first and are renamed into
/// place, so readers never observe a half-written record.
pub struct FileRecordStore {
    base_dir: PathBuf,
}

impl FileRecordStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

impl RecordStore for FileRecordStore {
    fn exists(&self, key: &str) -> bool {
        self.resolve(key).is_file()
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(key);
        if !path.is_file() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        fs::read(&path).map_err(|e| StoreError::Read {
            key: key.to_string(),
            source: e,
        })
    }

    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(key);
        let wrap = |e: std::io::Error| StoreError::Write {
            key: key.to_string(),
            source: e,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(wrap)?;
        }

        let temp_path = path.with_extension("part");
        fs::write(&temp_path, data).map_err(wrap)?;
        fs::rename(&temp_path, &path).map_err(wrap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FileRecordStore {
        FileRecordStore::new(dir.path().to_path_buf())
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        store.write("groups.json", b"{\"a\":1}").unwrap();

        assert!(store.exists("groups.json"));
        assert_eq!(store.read("groups.json").unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn test_exists_false_for_missing_key() {
        let dir = TempDir::new().unwrap();
        assert!(!store(&dir).exists("missing.json"));
    }

    #[test]
    fn test_read_missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).read("missing.json").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_nested_key_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        store.write("faces/holiday_beach.jpg.json", b"{}").unwrap();

        assert!(dir.path().join("faces/holiday_beach.jpg.json").is_file());
        assert!(store.exists("faces/holiday_beach.jpg.json"));
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        store.write("groups.json", b"old").unwrap();
        store.write("groups.json", b"new").unwrap();

        assert_eq!(store.read("groups.json").unwrap(), b"new");
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        store.write("groups.json", b"data").unwrap();

        assert!(!dir.path().join("groups.part").is_file());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_exists_is_false_for_directory() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.write("faces/x.json", b"{}").unwrap();

        assert!(!store.exists("faces"));
    }
}

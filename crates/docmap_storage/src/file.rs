//! File-based cache backend.

use crate::cache::Cache;
use crate::error::{StorageError, StorageResult};
use docmap_codec::{from_cbor, to_cbor, Value};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

const ENTRY_EXTENSION: &str = "cache";

/// A file-based cache.
///
/// Every key is stored as one CBOR file under the cache directory. File
/// names are the hex SHA-256 of the key, so arbitrary keys are safe to use.
///
/// # Durability
///
/// Writes go through a temporary file followed by a rename, so a reader
/// never observes a half-written entry.
///
/// # Thread Safety
///
/// Internal locking serializes writers within one process.
///
/// # Example
///
/// ```no_run
/// use docmap_codec::Value;
/// use docmap_storage::{Cache, FileCache};
/// use std::path::Path;
///
/// let cache = FileCache::open(Path::new("/tmp/docmap-cache")).unwrap();
/// cache.set("fingerprint", Value::from("fields")).unwrap();
/// ```
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    lock: RwLock<()>,
}

impl FileCache {
    /// Opens a cache rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CreateDir`] if the directory cannot be
    /// created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir).map_err(|source| StorageError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            lock: RwLock::new(()),
        })
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let mut name = String::with_capacity(digest.len() * 2 + ENTRY_EXTENSION.len() + 1);
        for byte in digest {
            let _ = write!(name, "{byte:02x}");
        }
        name.push('.');
        name.push_str(ENTRY_EXTENSION);
        self.dir.join(name)
    }
}

impl Cache for FileCache {
    fn has(&self, key: &str) -> StorageResult<bool> {
        let _guard = self.lock.read();
        Ok(self.entry_path(key).is_file())
    }

    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let _guard = self.lock.read();
        let bytes = match fs::read(self.entry_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = from_cbor(&bytes)
            .map_err(|e| StorageError::Corrupted(format!("entry for {key:?}: {e}")))?;
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let bytes = to_cbor(&value)?;
        let path = self.entry_path(key);
        let tmp = path.with_extension("tmp");

        let _guard = self.lock.write();
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        trace!(key, bytes = bytes.len(), "cache entry written");
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let _guard = self.lock.write();
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> StorageResult<()> {
        let _guard = self.lock.write();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_open_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cache");

        let cache = FileCache::open(&path).unwrap();
        assert!(path.is_dir());
        assert_eq!(cache.dir(), path);
    }

    #[test]
    fn file_open_fails_when_path_is_a_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("occupied");
        fs::write(&path, b"x").unwrap();

        let result = FileCache::open(&path);
        assert!(matches!(result, Err(StorageError::CreateDir { .. })));
    }

    #[test]
    fn file_lifecycle() {
        let dir = tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();

        cache.set("k", Value::from("v1")).unwrap();
        assert!(cache.has("k").unwrap());
        assert_eq!(cache.get("k").unwrap(), Some(Value::from("v1")));

        cache.remove("k").unwrap();
        assert!(!cache.has("k").unwrap());
        assert_eq!(cache.get("k").unwrap(), None);

        cache.set("k", Value::from("v2")).unwrap();
        cache.clear().unwrap();
        assert!(!cache.has("k").unwrap());
    }

    #[test]
    fn file_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let entry = Value::map([("fields", Value::map([("title", Value::from(1i64))]))]);

        {
            let cache = FileCache::open(dir.path()).unwrap();
            cache.set("h1", entry.clone()).unwrap();
        }

        let cache = FileCache::open(dir.path()).unwrap();
        assert_eq!(cache.get("h1").unwrap(), Some(entry));
    }

    #[test]
    fn file_keys_with_separators_are_safe() {
        let dir = tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();

        cache.set("../escape/attempt", Value::Bool(true)).unwrap();
        assert_eq!(cache.get("../escape/attempt").unwrap(), Some(Value::Bool(true)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn file_corrupted_entry_is_reported() {
        let dir = tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        cache.set("k", Value::Null).unwrap();
        fs::write(cache.entry_path("k"), [0xff, 0xff]).unwrap();

        assert!(matches!(cache.get("k"), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_clear_keeps_foreign_files() {
        let dir = tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        fs::write(dir.path().join("README"), b"keep").unwrap();
        cache.set("a", Value::Null).unwrap();

        cache.clear().unwrap();
        assert!(dir.path().join("README").exists());
        assert!(!cache.has("a").unwrap());
    }
}

//! File-backed storage.
//!
//! The whole store is one JSON object on disk. Every mutation writes a
//! temporary sibling file, syncs it and renames it over the original, so a
//! crash leaves either the old or the new contents and never a torn file.

use crate::{KeyValueStore, StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// JSON file store with atomic replace on write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or create) the store at `path`.
    ///
    /// A file that cannot be parsed is moved aside to
    /// `<name>.corrupt-<timestamp>` and the store starts empty.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(map) => map,
                Err(err) => {
                    let quarantine = quarantine_path(&path);
                    warn!(
                        path = %path.display(),
                        quarantine = %quarantine.display(),
                        error = %err,
                        "Store file is corrupt, starting empty"
                    );
                    fs::rename(&path, &quarantine)?;
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), keys = data.len(), "Opened file store");

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutate` to a copy of the map, persist it, and only then commit
    /// it in memory. A failed write leaves both tiers unchanged.
    fn mutate<T>(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, String>) -> T,
    ) -> StorageResult<T> {
        let mut guard = self.data.lock();
        let mut next = guard.clone();
        let result = mutate(&mut next);
        let content = serde_json::to_string_pretty(&next)?;
        atomic_write(&self.path, &content)?;
        *guard = next;
        Ok(result)
    }
}

impl KeyValueStore for FileStore {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.mutate(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        if !self.data.lock().contains_key(key) {
            return Ok(false);
        }
        self.mutate(|map| map.remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.data.lock().keys().cloned().collect())
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("store.json");
    path.with_file_name(format!(
        "{}.corrupt-{}",
        name,
        chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f")
    ))
}

fn atomic_write(path: &Path, content: &str) -> StorageResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::Backend(format!("no parent directory for {:?}", path)))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::Backend(format!("invalid store path {:?}", path)))?;
    let tmp_path = dir.join(format!(".{}.tmp.{}", file_name, Uuid::new_v4()));

    let write_result = (|| -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(StorageError::Io(err));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.set("lms.session/v2", "{\"a\":1}").unwrap();
            store.set("other", "x").unwrap();
            assert!(store.delete("other").unwrap());
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("lms.session/v2").unwrap(),
            Some("{\"a\":1}".to_string())
        );
        assert_eq!(reopened.get("other").unwrap(), None);
        assert_eq!(reopened.keys().unwrap(), vec!["lms.session/v2"]);
    }

    #[test]
    fn test_file_store_corrupt_file_is_quarantined() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{ this is not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.keys().unwrap().is_empty());
        assert!(!path.exists());

        let quarantined: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(quarantined.len(), 1);

        store.set("k", "v").unwrap();
        assert_eq!(FileStore::open(&path).unwrap().get("k").unwrap(), Some("v".into()));
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.set("k", "v").unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_file_store_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        for i in 0..5 {
            store.set(&format!("k{}", i), "v").unwrap();
        }

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_delete_missing_key_does_not_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();

        assert!(!store.delete("missing").unwrap());
        assert!(!path.exists());
    }
}

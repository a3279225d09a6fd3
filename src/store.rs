//! Persisted key-value store used for the device identity.
//!
//! Every write in this crate replaces a single key, so the file store only has
//! to make each write atomic. It holds an exclusive `fs2` lock on a sidecar
//! `.lock` file for the read-modify-write and swaps the document in with a
//! tempfile rename.

use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// String key-value store that survives restarts
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON document on disk
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    fn lock(&self) -> Result<File> {
        let mut lock_path = self.path.clone().into_os_string();
        lock_path.push(".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(PathBuf::from(lock_path))?;
        file.lock_exclusive()?;
        Ok(file)
    }

    fn read_document(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            Error::Store(format!(
                "Failed to parse store '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    fn write_document(&self, doc: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_json::to_string_pretty(doc)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Store(format!("Failed to replace store file: {}", e)))?;
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let lock = self.lock()?;
        let mut doc = self.read_document()?;
        f(&mut doc);
        let result = self.write_document(&doc);
        let _ = lock.unlock();
        result
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let lock = self.lock()?;
        let doc = self.read_document();
        let _ = lock.unlock();
        Ok(doc?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|doc| {
            doc.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|doc| {
            doc.remove(key);
        })
    }

    fn clear(&self) -> Result<()> {
        self.update(|doc| doc.clear())
    }
}

/// Process-local store, for tests and throwaway runs
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| Error::Store("memory store poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.values()?.clear();
        Ok(())
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use hotbundle_core::{PreferenceStore, UpdateError, UpdateResult};

use crate::fs_utils::write_file_atomic;

/// JSON-backed store; buffered writes become durable on `flush`.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FilePreferenceStore {
    pub fn open(path: impl Into<PathBuf>) -> UpdateResult<Self> {
        let path = path.into();
        let entries = read_entries(&path)?;
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_entries(path: &Path) -> UpdateResult<BTreeMap<String, String>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(UpdateError::storage_at("read", path, err)),
    };
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    serde_json::from_str(&raw).map_err(|err| {
        UpdateError::storage(
            format!("failed to parse preferences {}", path.display()),
            io::Error::new(io::ErrorKind::InvalidData, err),
        )
    })
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> UpdateResult<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> UpdateResult<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> UpdateResult<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn clear(&self) -> UpdateResult<()> {
        lock(&self.entries).clear();
        Ok(())
    }

    fn flush(&self) -> UpdateResult<()> {
        let entries = lock(&self.entries);
        let encoded = serde_json::to_vec_pretty(&*entries).map_err(|err| {
            UpdateError::storage(
                "failed to encode preferences",
                io::Error::new(io::ErrorKind::InvalidData, err),
            )
        })?;
        write_file_atomic(&self.path, &encoded)
            .map_err(|err| UpdateError::storage_at("write", &self.path, err))
    }
}

#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    entries: Mutex<BTreeMap<String, String>>,
    durable: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries as of the last `flush`.
    pub fn durable_snapshot(&self) -> BTreeMap<String, String> {
        lock(&self.durable).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> UpdateResult<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> UpdateResult<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> UpdateResult<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn clear(&self) -> UpdateResult<()> {
        lock(&self.entries).clear();
        Ok(())
    }

    fn flush(&self) -> UpdateResult<()> {
        let snapshot = lock(&self.entries).clone();
        *lock(&self.durable) = snapshot;
        Ok(())
    }
}

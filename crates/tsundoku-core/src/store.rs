//! Durable key-value storage
//!
//! Holds the rate-limit audit log, the active cooldown episode and the
//! startup record. Absence of a key is not an error.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{TsundokuError, TsundokuResult};

/// Durable byte store addressed by string keys
pub trait KeyValueStore: Send + Sync {
    /// Read a key; `Ok(None)` when the key was never written
    fn read(&self, key: &str) -> TsundokuResult<Option<Vec<u8>>>;

    /// Replace the value stored under a key
    fn write(&self, key: &str, bytes: &[u8]) -> TsundokuResult<()>;

    /// Append one newline-terminated record to a log-style key
    fn append_line(&self, key: &str, line: &[u8]) -> TsundokuResult<()> {
        let mut bytes = self.read(key)?.unwrap_or_default();
        bytes.extend_from_slice(line);
        bytes.push(b'\n');
        self.write(key, &bytes)
    }
}

/// Read and decode a JSON record
pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> TsundokuResult<Option<T>> {
    match store.read(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| TsundokuError::persistence(key, e)),
        None => Ok(None),
    }
}

/// Encode and write a JSON record
pub fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> TsundokuResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| TsundokuError::persistence(key, e))?;
    store.write(key, &bytes)
}

/// Append a JSON record as one line
pub fn append_json_line<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> TsundokuResult<()> {
    let line = serde_json::to_vec(value).map_err(|e| TsundokuError::persistence(key, e))?;
    store.append_line(key, &line)
}

/// In-memory store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> TsundokuResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> TsundokuResult<()> {
        self.entries.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn append_line(&self, key: &str, line: &[u8]) -> TsundokuResult<()> {
        let mut entries = self.entries.write();
        let value = entries.entry(key.to_string()).or_default();
        value.extend_from_slice(line);
        value.push(b'\n');
        Ok(())
    }
}

/// Filesystem store: one file per key under a root directory
///
/// Keys may contain `/` to group records into subdirectories. Writes go to a
/// temporary sibling first and are renamed into place.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> TsundokuResult<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(TsundokuError::persistence(key, "key must be a relative path"));
        }
        Ok(self.root.join(relative))
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, key: &str) -> TsundokuResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TsundokuError::persistence(key, e)),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> TsundokuResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TsundokuError::persistence(key, e))?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        std::fs::write(&tmp, bytes).map_err(|e| TsundokuError::persistence(key, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| TsundokuError::persistence(key, e))?;
        tracing::trace!(key, bytes = bytes.len(), "record written");
        Ok(())
    }

    fn append_line(&self, key: &str, line: &[u8]) -> TsundokuResult<()> {
        use std::io::Write;

        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TsundokuError::persistence(key, e))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TsundokuError::persistence(key, e))?;
        let mut record = line.to_vec();
        record.push(b'\n');
        file.write_all(&record)
            .map_err(|e| TsundokuError::persistence(key, e))
    }
}

//! Stores that misbehave on purpose

use std::sync::atomic::{AtomicU64, Ordering};

use tsundoku_core::{KeyValueStore, MemoryStore, TsundokuError, TsundokuResult};

/// Every operation fails
#[derive(Debug, Default)]
pub struct FailingStore {
    operations: AtomicU64,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations attempted so far
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    fn fail<T>(&self, key: &str) -> TsundokuResult<T> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        Err(TsundokuError::persistence(key, "store unavailable"))
    }
}

impl KeyValueStore for FailingStore {
    fn read(&self, key: &str) -> TsundokuResult<Option<Vec<u8>>> {
        self.fail(key)
    }

    fn write(&self, key: &str, _bytes: &[u8]) -> TsundokuResult<()> {
        self.fail(key)
    }

    fn append_line(&self, key: &str, _line: &[u8]) -> TsundokuResult<()> {
        self.fail(key)
    }
}

/// Reads work, writes fail (full disk)
#[derive(Debug, Default)]
pub struct ReadOnlyStore {
    inner: MemoryStore,
}

impl ReadOnlyStore {
    pub fn new(inner: MemoryStore) -> Self {
        ReadOnlyStore { inner }
    }
}

impl KeyValueStore for ReadOnlyStore {
    fn read(&self, key: &str) -> TsundokuResult<Option<Vec<u8>>> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, _bytes: &[u8]) -> TsundokuResult<()> {
        Err(TsundokuError::persistence(key, "no space left on device"))
    }
}

//! The narrow key/value interface the consensus core consumes from the
//! node's backing store.
//!
//! The core never assumes anything about the store beyond what is expressed
//! here: point reads, point writes, and atomic batched writes. Concurrent
//! readers are expected to be safe; writers are serialized by the caller.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by the backing store.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("backing store failure: {0}")]
pub struct StoreError(pub String);

/// A set of writes applied atomically via [`Store::write`].
///
/// The batch is the only write vehicle used while committing a block, which
/// is what makes commits all-or-nothing. Once handed to [`Store::write`] the
/// batch is consumed and may not be reused.
#[derive(Debug, Default)]
pub struct WriteBatch {
    writes: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a write. Nothing is persisted until [`Store::write`].
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.writes.push((key.to_vec(), value.to_vec()));
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether the batch holds no writes.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Consumes the batch, yielding the queued writes in insertion order.
    pub fn into_writes(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.writes
    }
}

/// Backing store consumed by the trie substrate and the state layer.
pub trait Store {
    /// Returns the value stored under `key`, or `None` if absent.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`.
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Applies every write in `batch` atomically: either all writes become
    /// observable or none do.
    fn write(&self, batch: WriteBatch) -> StoreResult<()>;
}

/// In-memory [`Store`] used by tests and the solo/dev path.
#[derive(Debug, Default)]
pub struct MemStore {
    map: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl Store for MemStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut map = self.map.write();
        for (key, value) in batch.into_writes() {
            map.insert(key, value);
        }
        Ok(())
    }
}

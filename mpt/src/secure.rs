//! Secure trie: keys are keccak-hashed before descent.
//!
//! Hashing the key hides path structure from whoever controls the keyspace,
//! so an adversary cannot craft keys that degenerate the trie into a long
//! chain. All account and storage tries use this wrapper.

use ethereum_types::H256;
use keccak_hash::keccak;
use kv::{Store, WriteBatch};

use crate::trie::Trie;
use crate::TrieResult;

/// A [`Trie`] whose keys are hashed with keccak-256 before every operation.
#[derive(Debug)]
pub struct SecureTrie<'a, S> {
    inner: Trie<'a, S>,
}

impl<'a, S: Store> SecureTrie<'a, S> {
    /// Creates an empty secure trie over `store`.
    pub fn empty(store: &'a S) -> Self {
        Self {
            inner: Trie::empty(store),
        }
    }

    /// Opens the secure trie persisted at `root`; a zero or empty-trie root
    /// yields an empty trie.
    pub fn open(root: H256, store: &'a S) -> TrieResult<Self> {
        Ok(Self {
            inner: Trie::open(root, store)?,
        })
    }

    /// Returns the value stored under `key`, or `None` if absent.
    pub fn get(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        self.inner.get(keccak(key).as_bytes())
    }

    /// Records an update in memory. An empty `value` removes the key.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> TrieResult<()> {
        self.inner.insert(keccak(key).as_bytes(), value)
    }

    /// Removes `key`, returning the previous value if it was present.
    pub fn remove(&mut self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        self.inner.remove(keccak(key).as_bytes())
    }

    /// Root hash of the current in-memory state. Persists nothing.
    pub fn hash(&self) -> H256 {
        self.inner.hash()
    }

    /// Serializes all dirty nodes into `batch` and returns the root hash.
    pub fn commit(&self, batch: &mut WriteBatch) -> H256 {
        self.inner.commit(batch)
    }
}

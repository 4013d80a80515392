//! A Merkle-Patricia trie backed by a persistent key/value store.
//!
//! The trie keeps mutated nodes in memory and reads untouched subtrees from
//! the store on demand, so a trie opened at a root only ever materializes the
//! paths it actually walks. [`Trie::hash`] computes the root of the current
//! in-memory state without persisting anything; [`Trie::commit`] serializes
//! every dirty node into a [`kv::WriteBatch`], after which the trie can be
//! reopened at the returned root.
//!
//! Node encoding follows the canonical Ethereum scheme (hex-prefix paths,
//! 17-item branch nodes, sub-32-byte nodes inlined into their parent), so an
//! identical sequence of operations on any conforming implementation yields
//! bit-identical root hashes.
//!
//! [`SecureTrie`] is the entry point used by the state layer: it hashes every
//! key with keccak-256 before descent, which hides path structure and bounds
//! path length.

pub mod nibbles;
pub mod node;
pub mod secure;
pub mod trie;

mod hashing;

use ethereum_types::H256;
use thiserror::Error;

pub use secure::SecureTrie;
pub use trie::Trie;

/// Result alias for trie operations.
pub type TrieResult<T> = Result<T, TrieError>;

/// An error type for trie operations.
#[derive(Debug, Error)]
pub enum TrieError {
    /// The backing store failed while reading a node.
    #[error("backing store failure: {0}")]
    Store(#[from] kv::StoreError),

    /// A node referenced by hash is not present in the store.
    #[error("corrupt trie: missing node {0:#x}")]
    MissingNode(H256),

    /// A stored node failed to decode.
    #[error("corrupt trie: {0}")]
    Decode(#[from] rlp::DecoderError),
}

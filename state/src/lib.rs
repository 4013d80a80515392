//! The account state layer: a typed, copy-on-write view over the accounts
//! trie, and the stage that turns a block's mutations into a new state root.
//!
//! A [`State`] is opened at a parent state root, serves the executor's reads
//! and writes for the duration of one block, and is then turned into a
//! [`Stage`]. The stage computes the post-block root without writing
//! anything, and commits all of it (code blobs, storage tries, accounts
//! trie) in a single atomic batch.

pub mod account;
pub mod stage;

mod state;

use protocol::Hash;
use thiserror::Error;

pub use account::Account;
pub use stage::Stage;
pub use state::State;

/// Result alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// An error type for state operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// The backing store failed.
    #[error("backing store failure: {0}")]
    Store(#[from] kv::StoreError),

    /// The underlying trie is corrupt or unreadable.
    #[error(transparent)]
    Trie(#[from] mpt::TrieError),

    /// A stored account record or storage entry failed to decode.
    #[error("malformed stored value: {0}")]
    Encoding(#[from] rlp::DecoderError),

    /// An account references a code blob that is not in the store.
    #[error("corrupt state: missing code blob {0:#x}")]
    MissingCode(Hash),
}

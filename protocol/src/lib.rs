//! Primitive types and protocol constants shared by every subsystem of the
//! node.
//!
//! Constants here are network-wide values baked into the protocol. They are
//! plain values: nothing in this crate reads configuration, the environment,
//! or any other ambient state.

use ethereum_types::U256;

/// 20-byte account identifier.
pub type Address = ethereum_types::H160;

/// 32-byte cryptographic digest. Output of the trie hash function and the
/// key under which code blobs are persisted.
pub type Hash = ethereum_types::H256;

/// Byte length of an [`Address`].
pub const ADDRESS_LENGTH: usize = 20;

/// Byte length of a [`Hash`].
pub const HASH_LENGTH: usize = 32;

/// Seconds between consecutive block-production slots. Every legal block
/// timestamp is a multiple of this interval past genesis.
pub const BLOCK_INTERVAL: u64 = 10;

/// Energy generated per second by [`E18`] balance units.
pub const ENERGY_GROWTH_RATE: u64 = 5_000_000_000;

/// Scale factor of [`ENERGY_GROWTH_RATE`] (10^18, little-endian limbs).
pub const E18: U256 = U256([1_000_000_000_000_000_000, 0, 0, 0]);

/// Root hash of an empty trie (`keccak(rlp(""))`).
pub use keccak_hash::KECCAK_NULL_RLP as EMPTY_TRIE_ROOT;

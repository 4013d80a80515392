//! Nibble paths for trie descent.
//!
//! Keys reach the trie as keccak digests, so every full path is a fixed 64
//! nibbles; node paths are contiguous slices of such a key. One nibble is
//! stored per byte, which keeps splitting and merging trivial at the cost of
//! a little memory on transient paths.

use std::fmt::{self, Debug, Display, LowerHex};
use std::ops::Deref;

use rlp::DecoderError;

/// A nibble has 4 bits and is stored as a `u8` in the range `0..16`.
pub type Nibble = u8;

/// An owned sequence of nibbles.
#[derive(Clone, Default, Eq, Hash, PartialEq)]
pub struct Nibbles {
    data: Vec<Nibble>,
}

impl Nibbles {
    /// Expands each byte of `bytes` into two nibbles, most significant first.
    pub fn unpack(bytes: &[u8]) -> Self {
        let mut data = Vec::with_capacity(bytes.len() * 2);
        for b in bytes {
            data.push(b >> 4);
            data.push(b & 0x0f);
        }
        Self { data }
    }

    /// Copies a nibble slice into an owned path.
    pub fn from_nibbles(nibbles: &[Nibble]) -> Self {
        debug_assert!(nibbles.iter().all(|n| *n < 16));
        Self {
            data: nibbles.to_vec(),
        }
    }

    /// Concatenates `prefix` and `suffix` into a new path.
    pub fn join(prefix: &[Nibble], suffix: &[Nibble]) -> Self {
        let mut data = Vec::with_capacity(prefix.len() + suffix.len());
        data.extend_from_slice(prefix);
        data.extend_from_slice(suffix);
        Self { data }
    }

    /// Hex-prefix encoding of the path, per the Ethereum trie spec: the first
    /// nibble carries the leaf flag (bit 1) and the odd-length flag (bit 0),
    /// followed by the path packed two nibbles per byte.
    pub fn to_hex_prefix(&self, is_leaf: bool) -> Vec<u8> {
        let mut flag: Nibble = if is_leaf { 2 } else { 0 };
        let odd = self.data.len() % 2 == 1;

        let mut out = Vec::with_capacity(self.data.len() / 2 + 1);
        let rest = if odd {
            flag |= 1;
            out.push(flag << 4 | self.data[0]);
            &self.data[1..]
        } else {
            out.push(flag << 4);
            &self.data[..]
        };
        for pair in rest.chunks_exact(2) {
            out.push(pair[0] << 4 | pair[1]);
        }
        out
    }

    /// Decodes a hex-prefix encoded path, returning the path and whether the
    /// leaf flag was set.
    pub fn from_hex_prefix(encoded: &[u8]) -> Result<(Self, bool), DecoderError> {
        let first = *encoded
            .first()
            .ok_or(DecoderError::Custom("empty hex-prefix path"))?;
        let flag = first >> 4;
        if flag > 3 {
            return Err(DecoderError::Custom("invalid hex-prefix flag"));
        }
        let is_leaf = flag & 2 != 0;

        let mut data = Vec::with_capacity(encoded.len() * 2);
        if flag & 1 != 0 {
            data.push(first & 0x0f);
        }
        for b in &encoded[1..] {
            data.push(b >> 4);
            data.push(b & 0x0f);
        }
        Ok((Self { data }, is_leaf))
    }
}

/// Length of the longest common prefix of two nibble slices.
pub fn common_prefix_len(a: &[Nibble], b: &[Nibble]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

impl Deref for Nibbles {
    type Target = [Nibble];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl From<&[Nibble]> for Nibbles {
    fn from(nibbles: &[Nibble]) -> Self {
        Self::from_nibbles(nibbles)
    }
}

impl LowerHex for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for n in &self.data {
            write!(f, "{n:x}")?;
        }
        Ok(())
    }
}

impl Display for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{self:x}")
    }
}

impl Debug for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nibbles({self})")
    }
}

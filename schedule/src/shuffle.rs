//! Deterministic permutation of proposer indices.
//!
//! Consensus depends on every node deriving the *same* permutation from the
//! same seed, so the byte stream is fully pinned down:
//!
//! - Block `i` of the stream is `keccak256(seed ∥ be64(i))`, for
//!   `i = 0, 1, 2, …`; the stream is the concatenation of those 32-byte
//!   blocks.
//! - A Fisher–Yates walk runs from the highest index down to 1. For index
//!   `i` it draws big-endian `u32`s from the stream, rejecting any draw
//!   `r` with `r ≥ ⌊2³² / (i+1)⌋ · (i+1)`, and swaps `i` with
//!   `r mod (i+1)` on the first accepted draw.
//!
//! Rejection keeps every position exactly uniform, and the swap-down order
//! makes the permutation a pure function of the seed. A counterpart
//! implementation reproducing these rules byte for byte will agree on every
//! permutation.

use keccak_hash::keccak;

/// Fills `perm` with a permutation of `0..perm.len()` derived from `seed`.
pub fn shuffle(seed: &[u8], perm: &mut [usize]) {
    for (i, slot) in perm.iter_mut().enumerate() {
        *slot = i;
    }
    if perm.len() < 2 {
        return;
    }

    let mut stream = ByteStream::new(seed);
    for i in (1..perm.len()).rev() {
        let j = stream.next_bounded(i as u32 + 1) as usize;
        perm.swap(i, j);
    }
}

/// Keccak counter-mode expansion of a seed into an unbounded byte stream.
struct ByteStream<'a> {
    seed: &'a [u8],
    counter: u64,
    block: [u8; 32],
    used: usize,
}

impl<'a> ByteStream<'a> {
    fn new(seed: &'a [u8]) -> Self {
        Self {
            seed,
            counter: 0,
            block: [0; 32],
            used: 32,
        }
    }

    fn next_byte(&mut self) -> u8 {
        if self.used == 32 {
            let mut input = Vec::with_capacity(self.seed.len() + 8);
            input.extend_from_slice(self.seed);
            input.extend_from_slice(&self.counter.to_be_bytes());
            self.block = keccak(&input).0;
            self.counter += 1;
            self.used = 0;
        }
        let byte = self.block[self.used];
        self.used += 1;
        byte
    }

    fn next_u32(&mut self) -> u32 {
        u32::from_be_bytes([
            self.next_byte(),
            self.next_byte(),
            self.next_byte(),
            self.next_byte(),
        ])
    }

    /// Uniform draw in `0..bound` via modulo-rejection sampling.
    fn next_bounded(&mut self, bound: u32) -> u32 {
        let zone = ((1u64 << 32) / u64::from(bound)) * u64::from(bound);
        loop {
            let draw = u64::from(self.next_u32());
            if draw < zone {
                return (draw % u64::from(bound)) as u32;
            }
        }
    }
}

//! Deterministic block-production scheduling for the authorized proposer
//! set.
//!
//! A [`Schedule`] is built per block decision from the parent header's view
//! of the proposer set: the ordered proposer list, the subset currently
//! marked absent, and the parent number and timestamp. [`Schedule::timing`]
//! answers "when may this proposer produce next, and who gets marked absent
//! on the way there"; [`Schedule::validate`] is the predicate a verifier
//! runs against every inbound block header. Both are pure functions of the
//! construction inputs; no clock, state or randomness is consulted.

pub mod shuffle;

use std::collections::HashSet;

use log::trace;
use protocol::{Address, BLOCK_INTERVAL};
use thiserror::Error;

use crate::shuffle::shuffle;

/// Result alias for schedule operations.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// An error type for schedule operations.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum ScheduleError {
    /// The queried address is not in the authorized proposer set.
    #[error("address is not an authorized proposer")]
    NotAProposer,

    /// Construction requires at least one live proposer.
    #[error("absentee count must be less than proposer count")]
    InvalidInput,
}

/// Slot assignment over the proposer set as of one parent block.
#[derive(Clone, Debug)]
pub struct Schedule {
    proposers: Vec<Address>,
    absentee: HashSet<Address>,
    parent_number: u32,
    parent_time: u64,
}

impl Schedule {
    /// Builds the schedule for the block following parent
    /// `(parent_number, parent_time)`. Fails with
    /// [`ScheduleError::InvalidInput`] unless the absentee set is strictly
    /// smaller than the proposer set.
    pub fn new(
        proposers: Vec<Address>,
        absentee: &[Address],
        parent_number: u32,
        parent_time: u64,
    ) -> ScheduleResult<Self> {
        if absentee.len() >= proposers.len() {
            return Err(ScheduleError::InvalidInput);
        }
        Ok(Self {
            proposers,
            absentee: absentee.iter().copied().collect(),
            parent_number,
            parent_time,
        })
    }

    /// Determines the earliest legal timestamp `>= now` at which `addr` may
    /// produce a block, along with the absentee set that block would carry:
    /// every proposer whose turn is skipped on the way to `addr`'s slot is
    /// marked absent, and `addr` itself is cleared.
    ///
    /// The walk is deterministic: each round permutes the proposer indices
    /// with [`shuffle`], seeded by the parent number and the round index, so
    /// every honest node agrees on the answer.
    pub fn timing(&self, addr: Address, now: u64) -> ScheduleResult<(u64, HashSet<Address>)> {
        if !self.proposers.contains(&addr) {
            return Err(ScheduleError::NotAProposer);
        }

        let predicted = self.parent_time + BLOCK_INTERVAL;
        let live = (self.proposers.len() - self.absentee.len()) as u64;
        let round_span = live * BLOCK_INTERVAL;

        // Round index we are in or past; clamped to 0 when clocks lag the
        // chain (now < predicted).
        let mut round = if now >= predicted + round_span {
            (now - predicted) / round_span
        } else {
            0
        };

        // Whole rounds were skipped: everyone starts out absent. Otherwise
        // the parent's absentee set is carried forward.
        let mut new_absentee: HashSet<Address> = if round > 0 {
            self.proposers.iter().copied().collect()
        } else {
            self.absentee.clone()
        };

        let mut perm = vec![0usize; self.proposers.len()];
        loop {
            let mut seed = [0u8; 12];
            seed[..4].copy_from_slice(&self.parent_number.to_be_bytes());
            seed[4..].copy_from_slice(&round.to_be_bytes());
            shuffle(&seed, &mut perm);
            trace!("Walking round {round} with permutation {perm:?}");

            let mut t = predicted + round_span * round;
            for &i in &perm {
                let proposer = self.proposers[i];
                if proposer != addr {
                    // A live proposer ahead of us occupies one slot; either
                    // way its turn is skipped this round.
                    if !self.absentee.contains(&proposer) {
                        t += BLOCK_INTERVAL;
                    }
                    new_absentee.insert(proposer);
                    continue;
                }

                if now > t {
                    // Our slot in this round already passed.
                    break;
                }
                new_absentee.remove(&addr);
                return Ok((t, new_absentee));
            }
            round += 1;
        }
    }

    /// Whether `timestamp` is exactly the slot [`Schedule::timing`] assigns
    /// to `addr` at that time. This is the consensus predicate run on every
    /// inbound block header.
    pub fn validate(&self, addr: Address, timestamp: u64) -> ScheduleResult<bool> {
        let (slot, _) = self.timing(addr, timestamp)?;
        Ok(slot == timestamp)
    }
}

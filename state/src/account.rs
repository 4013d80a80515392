//! The account record persisted in the accounts trie.

use ethereum_types::U256;
use protocol::{Address, Hash, ADDRESS_LENGTH, E18, ENERGY_GROWTH_RATE, HASH_LENGTH};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

/// One account as stored in the accounts trie.
///
/// Optional fields encode as empty byte strings, never as hashes of empty
/// input: an account without code has *no* `code_hash`, and an account with
/// no storage has *no* `storage_root`. This keeps [`Account::is_empty`]
/// exact, which in turn lets empty accounts be elided from the trie.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Account {
    /// Main balance.
    pub balance: U256,
    /// Secondary resource, grown lazily from `balance` since
    /// `bound_energy_time`.
    pub energy: U256,
    /// Timestamp at which `energy` was last bound.
    pub bound_energy_time: u64,
    /// Controller of the account, if any.
    pub master: Option<Address>,
    /// Hash of the account's code blob, absent for pure accounts.
    pub code_hash: Option<Hash>,
    /// Root of the account's storage trie, absent when storage is empty.
    pub storage_root: Option<Hash>,
}

impl Account {
    /// Whether every field is at its zero value. Empty accounts are elided
    /// from the accounts trie entirely.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero()
            && self.energy.is_zero()
            && self.bound_energy_time == 0
            && self.master.is_none()
            && self.code_hash.is_none()
            && self.storage_root.is_none()
    }

    /// Energy accrued by `block_time`: the bound amount plus linear growth
    /// from the balance since `bound_energy_time`.
    pub fn energy_at(&self, block_time: u64) -> U256 {
        if block_time <= self.bound_energy_time {
            return self.energy;
        }
        let dt = U256::from(block_time - self.bound_energy_time);
        self.energy + self.balance * U256::from(ENERGY_GROWTH_RATE) * dt / E18
    }
}

impl Encodable for Account {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(6);
        s.append(&self.balance);
        s.append(&self.energy);
        s.append(&self.bound_energy_time);
        append_optional(s, self.master.as_ref().map(|a| a.as_bytes()));
        append_optional(s, self.code_hash.as_ref().map(|h| h.as_bytes()));
        append_optional(s, self.storage_root.as_ref().map(|h| h.as_bytes()));
    }
}

impl Decodable for Account {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 6 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Account {
            balance: rlp.val_at(0)?,
            energy: rlp.val_at(1)?,
            bound_energy_time: rlp.val_at(2)?,
            master: decode_optional(rlp.at(3)?, ADDRESS_LENGTH)?.as_deref().map(Address::from_slice),
            code_hash: decode_optional(rlp.at(4)?, HASH_LENGTH)?.as_deref().map(Hash::from_slice),
            storage_root: decode_optional(rlp.at(5)?, HASH_LENGTH)?.as_deref().map(Hash::from_slice),
        })
    }
}

fn append_optional(s: &mut RlpStream, bytes: Option<&[u8]>) {
    match bytes {
        Some(b) => s.append(&b),
        None => s.append_empty_data(),
    };
}

fn decode_optional(rlp: Rlp, len: usize) -> Result<Option<Vec<u8>>, DecoderError> {
    let data = rlp.data()?;
    if data.is_empty() {
        Ok(None)
    } else if data.len() == len {
        Ok(Some(data.to_vec()))
    } else {
        Err(DecoderError::Custom("unexpected field length in account"))
    }
}

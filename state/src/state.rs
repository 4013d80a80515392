//! The mutable state map driven by the transaction executor.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use bytes::Bytes;
use ethereum_types::U256;
use keccak_hash::keccak;
use kv::Store;
use log::trace;
use mpt::SecureTrie;
use protocol::{Address, Hash};

use crate::account::Account;
use crate::stage::Stage;
use crate::{StateError, StateResult};

/// Pending mutations for one account within the current block.
///
/// `orig` is the record as it was decoded from the trie; comparing against
/// it at stage time is what lets untouched accounts skip re-hashing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ChangedObject {
    pub(crate) orig: Account,
    pub(crate) data: Account,
    pub(crate) code: Option<Bytes>,
    pub(crate) storage: HashMap<Hash, U256>,
}

impl ChangedObject {
    fn clean(account: Account) -> Self {
        Self {
            orig: account.clone(),
            data: account,
            code: None,
            storage: HashMap::new(),
        }
    }

    /// A clean object carries no effective mutation and must not touch the
    /// trie at stage time.
    pub(crate) fn is_clean(&self) -> bool {
        self.code.is_none() && self.storage.is_empty() && self.data == self.orig
    }
}

/// A typed view over the accounts trie for the duration of one block.
///
/// Reads observe all prior writes made through the same instance. Writes
/// accumulate in a changed-object set and only reach the store through
/// [`State::stage`] followed by [`Stage::commit`].
#[derive(Debug)]
pub struct State<'a, S: Store> {
    store: &'a S,
    root: Hash,
    trie: SecureTrie<'a, S>,
    changes: HashMap<Address, ChangedObject>,
    storage_tries: HashMap<Address, SecureTrie<'a, S>>,
    journal: Vec<(Address, ChangedObject)>,
}

impl<'a, S: Store> State<'a, S> {
    /// Opens the state at `root`. Fails if the root is not resolvable in the
    /// store.
    pub fn new(root: Hash, store: &'a S) -> StateResult<Self> {
        Ok(Self {
            store,
            root,
            trie: SecureTrie::open(root, store)?,
            changes: HashMap::new(),
            storage_tries: HashMap::new(),
            journal: Vec::new(),
        })
    }

    /// The root this state was opened at.
    pub fn root(&self) -> Hash {
        self.root
    }

    /// Returns the account record for `addr`, or the empty record if the
    /// account does not exist.
    pub fn get_account(&mut self, addr: Address) -> StateResult<Account> {
        Ok(self.load(addr)?.data.clone())
    }

    /// Whether `addr` holds a non-empty account.
    pub fn exists(&mut self, addr: Address) -> StateResult<bool> {
        Ok(!self.load(addr)?.data.is_empty())
    }

    /// Balance of `addr`.
    pub fn get_balance(&mut self, addr: Address) -> StateResult<U256> {
        Ok(self.load(addr)?.data.balance)
    }

    /// Sets the balance of `addr`.
    pub fn set_balance(&mut self, addr: Address, balance: U256) -> StateResult<()> {
        trace!("Setting balance of {addr:#x} to {balance}");
        self.modify(addr, |obj| obj.data.balance = balance)
    }

    /// Energy of `addr` accrued by `block_time`.
    pub fn get_energy(&mut self, addr: Address, block_time: u64) -> StateResult<U256> {
        Ok(self.load(addr)?.data.energy_at(block_time))
    }

    /// Binds the energy of `addr` to `energy` as of `block_time`; accrual
    /// restarts from there.
    pub fn set_energy(&mut self, addr: Address, energy: U256, block_time: u64) -> StateResult<()> {
        trace!("Binding energy of {addr:#x} to {energy} at {block_time}");
        self.modify(addr, |obj| {
            obj.data.energy = energy;
            obj.data.bound_energy_time = block_time;
        })
    }

    /// Master of `addr`, if one is set.
    pub fn get_master(&mut self, addr: Address) -> StateResult<Option<Address>> {
        Ok(self.load(addr)?.data.master)
    }

    /// Sets or clears the master of `addr`.
    pub fn set_master(&mut self, addr: Address, master: Option<Address>) -> StateResult<()> {
        self.modify(addr, |obj| obj.data.master = master)
    }

    /// Code hash of `addr`, absent for pure accounts.
    pub fn get_code_hash(&mut self, addr: Address) -> StateResult<Option<Hash>> {
        Ok(self.load(addr)?.data.code_hash)
    }

    /// Code blob of `addr`; empty when the account has no code.
    pub fn get_code(&mut self, addr: Address) -> StateResult<Bytes> {
        let obj = self.load(addr)?;
        if let Some(code) = &obj.code {
            return Ok(code.clone());
        }
        let Some(hash) = obj.data.code_hash else {
            return Ok(Bytes::new());
        };
        let blob = self
            .store
            .get(hash.as_bytes())?
            .ok_or(StateError::MissingCode(hash))?;
        Ok(Bytes::from(blob))
    }

    /// Installs `code` on `addr`. An empty blob clears the code hash rather
    /// than associating the hash of empty input.
    pub fn set_code(&mut self, addr: Address, code: Bytes) -> StateResult<()> {
        trace!("Installing {} code bytes on {addr:#x}", code.len());
        self.modify(addr, |obj| {
            if code.is_empty() {
                obj.code = None;
                obj.data.code_hash = None;
            } else {
                obj.data.code_hash = Some(keccak(&code));
                obj.code = Some(code);
            }
        })
    }

    /// Value of storage `slot` of `addr`; zero when unset.
    ///
    /// Pending writes are consulted first; otherwise the account's storage
    /// trie is opened at its current root and cached for later reads.
    pub fn get_storage(&mut self, addr: Address, slot: Hash) -> StateResult<U256> {
        self.load(addr)?;
        if let Some(value) = self.changes.get(&addr).and_then(|o| o.storage.get(&slot)) {
            return Ok(*value);
        }
        let root = self
            .changes
            .get(&addr)
            .and_then(|o| o.data.storage_root)
            .unwrap_or_default();

        let store = self.store;
        let trie = match self.storage_tries.entry(addr) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(SecureTrie::open(root, store)?),
        };
        match trie.get(slot.as_bytes())? {
            None => Ok(U256::zero()),
            Some(bytes) => Ok(rlp::decode::<U256>(&bytes)?),
        }
    }

    /// Sets storage `slot` of `addr` to `value`. Zero marks the slot for
    /// removal from the storage trie.
    pub fn set_storage(&mut self, addr: Address, slot: Hash, value: U256) -> StateResult<()> {
        trace!("Setting storage {slot:#x} of {addr:#x} to {value}");
        self.modify(addr, |obj| {
            obj.storage.insert(slot, value);
        })
    }

    /// Resets `addr` to the empty account and drops its pending code and
    /// storage mutations. Combined with empty-account elision this removes
    /// the account from the trie at stage time.
    pub fn delete_account(&mut self, addr: Address) -> StateResult<()> {
        trace!("Deleting account {addr:#x}");
        self.modify(addr, |obj| {
            obj.data = Account::default();
            obj.code = None;
            obj.storage.clear();
        })?;
        self.storage_tries.remove(&addr);
        Ok(())
    }

    /// Returns a cursor for [`State::revert_to`]. Checkpoints nest: taking a
    /// newer one never invalidates an older one.
    pub fn checkpoint(&self) -> usize {
        self.journal.len()
    }

    /// Rolls the changed-object set back to a cursor from
    /// [`State::checkpoint`], discarding every mutation made since.
    pub fn revert_to(&mut self, checkpoint: usize) {
        while self.journal.len() > checkpoint {
            let Some((addr, prior)) = self.journal.pop() else {
                break;
            };
            self.changes.insert(addr, prior);
        }
    }

    /// Freezes the changed-object set into a [`Stage`]. The state can be
    /// dropped afterwards; the stage only borrows the backing store.
    pub fn stage(&self) -> StateResult<Stage<'a, S>> {
        Stage::build(self.root, self.store, &self.changes)
    }

    /// Loads the changed object for `addr`, decoding the stored record on
    /// first touch.
    fn load(&mut self, addr: Address) -> StateResult<&mut ChangedObject> {
        if !self.changes.contains_key(&addr) {
            let account = match self.trie.get(addr.as_bytes())? {
                Some(bytes) => rlp::decode::<Account>(&bytes)?,
                None => Account::default(),
            };
            trace!("Loaded account {addr:#x} (empty: {})", account.is_empty());
            self.changes.insert(addr, ChangedObject::clean(account));
        }
        Ok(self
            .changes
            .get_mut(&addr)
            .expect("object inserted just above"))
    }

    /// Applies a mutation, journaling the displaced entry for revert.
    fn modify(&mut self, addr: Address, f: impl FnOnce(&mut ChangedObject)) -> StateResult<()> {
        let obj = self.load(addr)?;
        let prior = obj.clone();
        f(obj);
        self.journal.push((addr, prior));
        Ok(())
    }
}

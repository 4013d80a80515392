//! The stage: a frozen snapshot of a block's mutations, able to tell the
//! post-state root before anything is written and to commit it atomically.

use std::collections::HashMap;

use bytes::Bytes;
use ethereum_types::U256;
use kv::{Store, WriteBatch};
use log::{debug, trace};
use mpt::SecureTrie;
use protocol::{Address, Hash, EMPTY_TRIE_ROOT};

use crate::account::Account;
use crate::state::ChangedObject;
use crate::StateResult;

/// Pending changes to the accounts trie and every touched storage trie.
///
/// All trie work happens at construction; [`Stage::hash`] and
/// [`Stage::commit`] both read the tries built here, which is what makes
/// them agree by construction.
#[derive(Debug)]
pub struct Stage<'a, S: Store> {
    store: &'a S,
    accounts: SecureTrie<'a, S>,
    storage_tries: Vec<SecureTrie<'a, S>>,
    codes: Vec<(Hash, Bytes)>,
}

impl<'a, S: Store> Stage<'a, S> {
    /// Applies the changed-object set to a fresh view of the accounts trie
    /// opened at `root`.
    pub(crate) fn build(
        root: Hash,
        store: &'a S,
        changes: &HashMap<Address, ChangedObject>,
    ) -> StateResult<Self> {
        let mut accounts = SecureTrie::open(root, store)?;
        let mut storage_tries = Vec::new();
        let mut codes = Vec::new();

        for (addr, obj) in changes {
            if obj.is_clean() {
                trace!("Skipping untouched account {addr:#x}");
                continue;
            }
            let mut data = obj.data.clone();

            if let (Some(code), Some(hash)) = (&obj.code, data.code_hash) {
                codes.push((hash, code.clone()));
            }

            // An account that ends the block empty is elided entirely, so
            // its storage writes never materialize.
            if !data.is_empty() && !obj.storage.is_empty() {
                let mut storage =
                    SecureTrie::open(data.storage_root.unwrap_or_default(), store)?;
                for (slot, value) in &obj.storage {
                    save_storage(&mut storage, slot, value)?;
                }
                let storage_root = storage.hash();
                data.storage_root = (storage_root != EMPTY_TRIE_ROOT).then_some(storage_root);
                storage_tries.push(storage);
            }

            save_account(&mut accounts, *addr, &data)?;
        }

        Ok(Self {
            store,
            accounts,
            storage_tries,
            codes,
        })
    }

    /// The root the accounts trie would commit to. Writes nothing.
    pub fn hash(&self) -> Hash {
        self.accounts.hash()
    }

    /// Persists code blobs, storage tries and the accounts trie in one
    /// atomic batch and returns the new state root. On failure the batch is
    /// dropped and no partial state is observable.
    pub fn commit(self) -> StateResult<Hash> {
        let mut batch = WriteBatch::new();

        for (hash, code) in &self.codes {
            batch.put(hash.as_bytes(), code);
        }
        for storage in &self.storage_tries {
            storage.commit(&mut batch);
        }
        let root = self.accounts.commit(&mut batch);

        debug!(
            "Committing state root {root:#x} ({} batched writes, {} code blobs)",
            batch.len(),
            self.codes.len()
        );
        self.store.write(batch)?;
        Ok(root)
    }
}

/// Writes one storage slot with canonical encoding: the RLP of the minimal
/// big-endian bytes, with zero removing the leaf outright.
fn save_storage<'a, S: Store>(
    trie: &mut SecureTrie<'a, S>,
    slot: &Hash,
    value: &U256,
) -> StateResult<()> {
    if value.is_zero() {
        trie.remove(slot.as_bytes())?;
    } else {
        trie.insert(slot.as_bytes(), rlp::encode(value).to_vec())?;
    }
    Ok(())
}

/// Writes one account record, eliding empty accounts from the trie.
fn save_account<'a, S: Store>(
    trie: &mut SecureTrie<'a, S>,
    addr: Address,
    data: &Account,
) -> StateResult<()> {
    if data.is_empty() {
        trie.remove(addr.as_bytes())?;
    } else {
        trie.insert(addr.as_bytes(), rlp::encode(data).to_vec())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::State;
    use keccak_hash::keccak;
    use kv::MemStore;

    fn common_setup() {
        let _ = pretty_env_logger::try_init();
    }

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn slot(n: u8) -> Hash {
        Hash::repeat_byte(n)
    }

    #[test]
    fn empty_state_commits_to_the_empty_root() -> StateResult<()> {
        common_setup();
        let store = MemStore::new();
        let state = State::new(Hash::zero(), &store)?;
        let stage = state.stage()?;
        assert_eq!(stage.hash(), EMPTY_TRIE_ROOT);
        assert_eq!(stage.commit()?, EMPTY_TRIE_ROOT);
        Ok(())
    }

    #[test]
    fn hash_equals_commit() -> StateResult<()> {
        common_setup();
        let store = MemStore::new();
        let mut state = State::new(Hash::zero(), &store)?;
        state.set_balance(addr(1), U256::from(5u64))?;
        state.set_storage(addr(1), slot(1), U256::from(6u64))?;
        state.set_code(addr(2), Bytes::from_static(b"\x01\x02\x03"))?;

        let stage = state.stage()?;
        let hashed = stage.hash();
        assert_eq!(stage.commit()?, hashed);
        Ok(())
    }

    #[test]
    fn noop_stage_is_the_identity_on_the_root() -> StateResult<()> {
        common_setup();
        let store = MemStore::new();
        let mut state = State::new(Hash::zero(), &store)?;
        state.set_balance(addr(1), U256::from(5u64))?;
        let root = state.stage()?.commit()?;

        // Reads load objects into the changed set but must not dirty it.
        let mut reopened = State::new(root, &store)?;
        let _ = reopened.get_balance(addr(1))?;
        let _ = reopened.get_account(addr(2))?;
        assert_eq!(reopened.stage()?.commit()?, root);
        Ok(())
    }

    #[test]
    fn rewriting_the_original_value_does_not_move_the_root() -> StateResult<()> {
        common_setup();
        let store = MemStore::new();
        let mut state = State::new(Hash::zero(), &store)?;
        state.set_balance(addr(1), U256::from(5u64))?;
        let root = state.stage()?.commit()?;

        let mut reopened = State::new(root, &store)?;
        reopened.set_balance(addr(1), U256::from(9u64))?;
        reopened.set_balance(addr(1), U256::from(5u64))?;
        assert_eq!(reopened.stage()?.commit()?, root);
        Ok(())
    }

    #[test]
    fn root_is_independent_of_mutation_order() -> StateResult<()> {
        common_setup();
        let store = MemStore::new();

        let mut ab = State::new(Hash::zero(), &store)?;
        ab.set_balance(addr(1), U256::from(5u64))?;
        ab.set_balance(addr(2), U256::from(3u64))?;
        ab.set_storage(addr(3), slot(1), U256::from(7u64))?;
        ab.set_balance(addr(3), U256::one())?;

        let mut ba = State::new(Hash::zero(), &store)?;
        ba.set_balance(addr(3), U256::one())?;
        ba.set_storage(addr(3), slot(1), U256::from(7u64))?;
        ba.set_balance(addr(2), U256::from(3u64))?;
        ba.set_balance(addr(1), U256::from(5u64))?;

        assert_eq!(ab.stage()?.hash(), ba.stage()?.hash());
        assert_eq!(ab.stage()?.commit()?, ba.stage()?.commit()?);
        Ok(())
    }

    #[test]
    fn zeroed_account_commits_to_the_same_root_as_never_created() -> StateResult<()> {
        common_setup();
        let store = MemStore::new();

        let mut baseline = State::new(Hash::zero(), &store)?;
        baseline.set_balance(addr(1), U256::from(5u64))?;
        let expected = baseline.stage()?.commit()?;

        let mut state = State::new(Hash::zero(), &store)?;
        state.set_balance(addr(1), U256::from(5u64))?;
        state.set_balance(addr(2), U256::from(8u64))?;
        state.set_balance(addr(2), U256::zero())?;
        assert_eq!(state.stage()?.commit()?, expected);
        Ok(())
    }

    #[test]
    fn deleting_a_committed_account_elides_it() -> StateResult<()> {
        common_setup();
        let store = MemStore::new();

        let mut baseline = State::new(Hash::zero(), &store)?;
        baseline.set_balance(addr(1), U256::from(5u64))?;
        let expected = baseline.stage()?.commit()?;

        let mut state = State::new(expected, &store)?;
        state.set_balance(addr(2), U256::from(8u64))?;
        state.set_storage(addr(2), slot(1), U256::from(4u64))?;
        let widened = state.stage()?.commit()?;
        assert_ne!(widened, expected);

        let mut state = State::new(widened, &store)?;
        state.delete_account(addr(2))?;
        assert_eq!(state.stage()?.commit()?, expected);
        Ok(())
    }

    #[test]
    fn zero_storage_writes_leave_no_leaf_behind() -> StateResult<()> {
        common_setup();
        let store = MemStore::new();

        let mut baseline = State::new(Hash::zero(), &store)?;
        baseline.set_balance(addr(1), U256::one())?;
        let expected = baseline.stage()?.commit()?;

        let mut state = State::new(Hash::zero(), &store)?;
        state.set_balance(addr(1), U256::one())?;
        state.set_storage(addr(1), slot(9), U256::zero())?;
        assert_eq!(state.stage()?.commit()?, expected);

        // Overwriting an existing slot with zero removes it again.
        let mut state = State::new(expected, &store)?;
        state.set_storage(addr(1), slot(9), U256::from(3u64))?;
        let with_slot = state.stage()?.commit()?;
        assert_ne!(with_slot, expected);

        let mut state = State::new(with_slot, &store)?;
        state.set_storage(addr(1), slot(9), U256::zero())?;
        assert_eq!(state.stage()?.commit()?, expected);
        Ok(())
    }

    #[test]
    fn commit_persists_code_blobs_under_their_hash() -> StateResult<()> {
        common_setup();
        let store = MemStore::new();
        let code = Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]);

        let mut state = State::new(Hash::zero(), &store)?;
        state.set_code(addr(1), code.clone())?;
        state.stage()?.commit()?;

        let blob = store.get(keccak(&code).as_bytes()).unwrap();
        assert_eq!(blob, Some(code.to_vec()));
        Ok(())
    }

    #[test]
    fn storage_root_lands_in_the_account_record() -> StateResult<()> {
        common_setup();
        let store = MemStore::new();
        let mut state = State::new(Hash::zero(), &store)?;
        state.set_balance(addr(1), U256::one())?;
        state.set_storage(addr(1), slot(1), U256::from(42u64))?;
        let root = state.stage()?.commit()?;

        let mut reopened = State::new(root, &store)?;
        let account = reopened.get_account(addr(1))?;
        assert!(account.storage_root.is_some());

        // Clearing the only slot clears the root again.
        reopened.set_storage(addr(1), slot(1), U256::zero())?;
        let root = reopened.stage()?.commit()?;
        let mut final_state = State::new(root, &store)?;
        assert_eq!(final_state.get_account(addr(1))?.storage_root, None);
        Ok(())
    }

    #[test]
    fn mass_random_mutations_survive_commit_and_reopen() -> StateResult<()> {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        common_setup();
        let store = MemStore::new();
        let mut rng = StdRng::seed_from_u64(9001);

        let accounts: Vec<(Address, U256, Vec<(Hash, U256)>)> = (0..200u32)
            .map(|_| {
                let addr = Address::from(rng.gen::<[u8; 20]>());
                let balance = U256::from(rng.gen::<u64>()) + U256::one();
                let slots = (0..rng.gen_range(0..4))
                    .map(|_| {
                        (
                            Hash::from(rng.gen::<[u8; 32]>()),
                            U256::from(rng.gen::<u64>()) + U256::one(),
                        )
                    })
                    .collect();
                (addr, balance, slots)
            })
            .collect();

        let mut state = State::new(Hash::zero(), &store)?;
        for (addr, balance, slots) in &accounts {
            state.set_balance(*addr, *balance)?;
            for (slot, value) in slots {
                state.set_storage(*addr, *slot, *value)?;
            }
        }
        let stage = state.stage()?;
        let root = stage.hash();
        assert_eq!(stage.commit()?, root);

        let mut reopened = State::new(root, &store)?;
        for (addr, balance, slots) in &accounts {
            assert_eq!(reopened.get_balance(*addr)?, *balance);
            for (slot, value) in slots {
                assert_eq!(reopened.get_storage(*addr, *slot)?, *value);
            }
        }
        Ok(())
    }

    #[test]
    fn hash_does_not_write_to_the_store() -> StateResult<()> {
        common_setup();
        let store = MemStore::new();
        let mut state = State::new(Hash::zero(), &store)?;
        state.set_balance(addr(1), U256::from(5u64))?;
        state.set_storage(addr(1), slot(1), U256::from(6u64))?;

        let stage = state.stage()?;
        let _ = stage.hash();
        assert!(store.is_empty());

        stage.commit()?;
        assert!(!store.is_empty());
        Ok(())
    }
}

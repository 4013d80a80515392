//! Insert, lookup and removal over store-backed tries.

use ethereum_types::H256;
use keccak_hash::KECCAK_NULL_RLP;
use kv::{Store, WriteBatch};
use log::trace;

use crate::hashing::{commit_root, hash_root};
use crate::nibbles::{common_prefix_len, Nibble, Nibbles};
use crate::node::{decode_node, empty_children, Node, WrappedNode};
use crate::{TrieError, TrieResult};

/// A Merkle-Patricia trie rooted in a backing store.
///
/// Mutations rebuild only the walked path; untouched subtrees stay behind
/// [`Node::Hash`] references and are resolved from the store on demand. Keys
/// passed here are raw path bytes; use [`crate::SecureTrie`] for the hashed
/// keyspace the state layer operates on.
#[derive(Debug)]
pub struct Trie<'a, S> {
    store: &'a S,
    root: WrappedNode,
}

impl<'a, S: Store> Trie<'a, S> {
    /// Creates an empty trie over `store`.
    pub fn empty(store: &'a S) -> Self {
        Self {
            store,
            root: Node::Empty.into(),
        }
    }

    /// Opens the trie persisted at `root`. Fails with
    /// [`TrieError::MissingNode`] if the root is not reachable in the store.
    pub fn open(root: H256, store: &'a S) -> TrieResult<Self> {
        if root.is_zero() || root == KECCAK_NULL_RLP {
            return Ok(Self::empty(store));
        }
        let bytes = store
            .get(root.as_bytes())?
            .ok_or(TrieError::MissingNode(root))?;
        Ok(Self {
            store,
            root: decode_node(&bytes)?.into(),
        })
    }

    /// Returns the value stored under `key`, or `None` if absent.
    pub fn get(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        let path = Nibbles::unpack(key);
        self.get_at(&self.root.clone(), &path)
    }

    /// Records an update in memory. An empty `value` removes the key, which
    /// keeps semantically equal tries bit-identical.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> TrieResult<()> {
        if value.is_empty() {
            self.remove(key)?;
            return Ok(());
        }
        let path = Nibbles::unpack(key);
        trace!("Inserting {} value bytes at {path}", value.len());
        let root = self.root.clone();
        self.root = self.insert_at(&root, &path, value)?;
        Ok(())
    }

    /// Removes `key`, returning the previous value if it was present.
    pub fn remove(&mut self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        let path = Nibbles::unpack(key);
        trace!("Removing key {path} if present");
        let root = self.root.clone();
        match self.remove_at(&root, &path)? {
            None => Ok(None),
            Some((new_root, removed)) => {
                self.root = new_root;
                Ok(Some(removed))
            }
        }
    }

    /// Root hash of the current in-memory state. Persists nothing.
    pub fn hash(&self) -> H256 {
        hash_root(&self.root)
    }

    /// Serializes all dirty nodes into `batch` and returns the root hash.
    /// Once the batch is written the trie may be reopened at that root.
    pub fn commit(&self, batch: &mut WriteBatch) -> H256 {
        commit_root(&self.root, batch)
    }

    fn resolve(&self, hash: H256) -> TrieResult<Node> {
        trace!("Resolving stored node {hash:#x}");
        let bytes = self
            .store
            .get(hash.as_bytes())?
            .ok_or(TrieError::MissingNode(hash))?;
        decode_node(&bytes)
    }

    fn get_at(&self, node: &Node, key: &[Nibble]) -> TrieResult<Option<Vec<u8>>> {
        match node {
            Node::Empty => Ok(None),
            Node::Hash(h) => self.get_at(&self.resolve(*h)?, key),
            Node::Branch { children, value } => match key.split_first() {
                None => Ok((!value.is_empty()).then(|| value.clone())),
                Some((nib, rest)) => self.get_at(&children[*nib as usize], rest),
            },
            Node::Extension { path, child } => {
                if key.len() >= path.len() && key[..path.len()] == **path {
                    self.get_at(child, &key[path.len()..])
                } else {
                    Ok(None)
                }
            }
            Node::Leaf { path, value } => Ok((**path == *key).then(|| value.clone())),
        }
    }

    fn insert_at(&self, node: &Node, key: &[Nibble], value: Vec<u8>) -> TrieResult<WrappedNode> {
        match node {
            Node::Empty => Ok(Node::Leaf {
                path: key.into(),
                value,
            }
            .into()),
            Node::Hash(h) => self.insert_at(&self.resolve(*h)?, key, value),
            Node::Branch { children, value: branch_value } => match key.split_first() {
                None => Ok(Node::Branch {
                    children: children.clone(),
                    value,
                }
                .into()),
                Some((nib, rest)) => {
                    trace!("Insert traversed Branch (nibble: {nib:x})");
                    let updated = self.insert_at(&children[*nib as usize], rest, value)?;
                    let mut children = children.clone();
                    children[*nib as usize] = updated;
                    Ok(Node::Branch {
                        children,
                        value: branch_value.clone(),
                    }
                    .into())
                }
            },
            Node::Extension { path, child } => {
                trace!("Insert traversed Extension (path: {path})");
                let common = common_prefix_len(path, key);
                if common == path.len() {
                    let updated = self.insert_at(child, &key[common..], value)?;
                    return Ok(Node::Extension {
                        path: path.clone(),
                        child: updated,
                    }
                    .into());
                }

                // The key diverges inside this extension: split it around a
                // new branch. The branch consumes one nibble of each side.
                let mut children = empty_children();
                let mut branch_value = Vec::new();
                children[path[common] as usize] = match path.len() - common {
                    1 => child.clone(),
                    _ => Node::Extension {
                        path: Nibbles::from_nibbles(&path[common + 1..]),
                        child: child.clone(),
                    }
                    .into(),
                };
                match key.len() - common {
                    0 => branch_value = value,
                    _ => {
                        children[key[common] as usize] = Node::Leaf {
                            path: Nibbles::from_nibbles(&key[common + 1..]),
                            value,
                        }
                        .into()
                    }
                }
                Ok(wrap_with_prefix(
                    &key[..common],
                    Node::Branch {
                        children,
                        value: branch_value,
                    },
                ))
            }
            Node::Leaf {
                path,
                value: leaf_value,
            } => {
                trace!("Insert traversed Leaf (path: {path})");
                if **path == *key {
                    return Ok(Node::Leaf {
                        path: path.clone(),
                        value,
                    }
                    .into());
                }

                let common = common_prefix_len(path, key);
                let mut children = empty_children();
                let mut branch_value = Vec::new();
                match path.len() - common {
                    0 => branch_value = leaf_value.clone(),
                    _ => {
                        children[path[common] as usize] = Node::Leaf {
                            path: Nibbles::from_nibbles(&path[common + 1..]),
                            value: leaf_value.clone(),
                        }
                        .into()
                    }
                }
                match key.len() - common {
                    0 => branch_value = value,
                    _ => {
                        children[key[common] as usize] = Node::Leaf {
                            path: Nibbles::from_nibbles(&key[common + 1..]),
                            value,
                        }
                        .into()
                    }
                }
                Ok(wrap_with_prefix(
                    &key[..common],
                    Node::Branch {
                        children,
                        value: branch_value,
                    },
                ))
            }
        }
    }

    fn remove_at(
        &self,
        node: &Node,
        key: &[Nibble],
    ) -> TrieResult<Option<(WrappedNode, Vec<u8>)>> {
        match node {
            Node::Empty => Ok(None),
            Node::Hash(h) => self.remove_at(&self.resolve(*h)?, key),
            Node::Branch { children, value } => {
                let (nib, rest) = match key.split_first() {
                    None => {
                        // Removing the branch's own value.
                        return Ok((!value.is_empty()).then(|| {
                            (
                                Node::Branch {
                                    children: children.clone(),
                                    value: Vec::new(),
                                }
                                .into(),
                                value.clone(),
                            )
                        }));
                    }
                    Some(split) => split,
                };
                trace!("Remove traversed Branch (nibble: {nib:x})");

                let Some((updated, removed)) = self.remove_at(&children[*nib as usize], rest)?
                else {
                    return Ok(None);
                };

                let live = children
                    .iter()
                    .enumerate()
                    .filter(|(i, c)| *i != *nib as usize && !c.is_empty())
                    .count();

                let new_node = if updated.is_empty() && live == 0 {
                    // Last child gone; only a possible branch value remains.
                    match value.is_empty() {
                        true => Node::Empty.into(),
                        false => Node::Leaf {
                            path: Nibbles::default(),
                            value: value.clone(),
                        }
                        .into(),
                    }
                } else if updated.is_empty() && live == 1 && value.is_empty() {
                    // One child left: the branch degenerates into a path
                    // segment over that child, possibly merging further.
                    let (other_nib, other) = children
                        .iter()
                        .enumerate()
                        .find(|(i, c)| *i != *nib as usize && !c.is_empty())
                        .expect("exactly one live sibling was counted");
                    trace!("Branch collapsed into slot {other_nib:x}");
                    self.join_prefix(&[other_nib as Nibble], other)?
                } else {
                    let mut children = children.clone();
                    children[*nib as usize] = updated;
                    Node::Branch {
                        children,
                        value: value.clone(),
                    }
                    .into()
                };
                Ok(Some((new_node, removed)))
            }
            Node::Extension { path, child } => {
                trace!("Remove traversed Extension (path: {path})");
                if key.len() < path.len() || key[..path.len()] != **path {
                    return Ok(None);
                }
                let Some((updated, removed)) = self.remove_at(child, &key[path.len()..])? else {
                    return Ok(None);
                };
                let new_node = match updated.is_empty() {
                    true => Node::Empty.into(),
                    false => self.join_prefix(path, &updated)?,
                };
                Ok(Some((new_node, removed)))
            }
            Node::Leaf { path, value } => {
                trace!("Remove traversed Leaf (path: {path})");
                Ok((**path == *key).then(|| (Node::Empty.into(), value.clone())))
            }
        }
    }

    /// Canonicalizes a path segment over `child`: short nodes are merged into
    /// the segment, branches are pointed at through an extension. A stored
    /// child must be resolved first, since its node type decides the merge.
    fn join_prefix(&self, prefix: &[Nibble], child: &WrappedNode) -> TrieResult<WrappedNode> {
        let resolved;
        let target: &Node = match child.as_ref() {
            Node::Hash(h) => {
                resolved = self.resolve(*h)?;
                &resolved
            }
            other => other,
        };
        trace!("Joining prefix onto {} child", target.kind());
        Ok(match target {
            Node::Leaf { path, value } => Node::Leaf {
                path: Nibbles::join(prefix, path),
                value: value.clone(),
            }
            .into(),
            Node::Extension {
                path,
                child: grandchild,
            } => Node::Extension {
                path: Nibbles::join(prefix, path),
                child: grandchild.clone(),
            }
            .into(),
            // Point at the original child so an untouched stored branch is
            // not re-expanded in memory.
            _ => Node::Extension {
                path: prefix.into(),
                child: child.clone(),
            }
            .into(),
        })
    }
}

fn wrap_with_prefix(prefix: &[Nibble], branch: Node) -> WrappedNode {
    match prefix.is_empty() {
        true => branch.into(),
        false => Node::Extension {
            path: prefix.into(),
            child: branch.into(),
        }
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv::MemStore;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const MASS_TRIE_SIZE: usize = 2000;

    fn common_setup() {
        // Try init since multiple tests calling `init` will cause an error.
        let _ = pretty_env_logger::try_init();
    }

    fn random_entries(n: usize, seed: u64) -> Vec<([u8; 32], Vec<u8>)> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let key: [u8; 32] = rng.gen();
                let len = rng.gen_range(1..=64);
                let value: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                (key, value)
            })
            .collect()
    }

    #[test]
    fn empty_trie_has_the_null_rlp_root() {
        common_setup();
        let store = MemStore::new();
        assert_eq!(Trie::empty(&store).hash(), KECCAK_NULL_RLP);
    }

    #[test]
    fn open_at_empty_roots_yields_an_empty_trie() {
        common_setup();
        let store = MemStore::new();
        assert!(Trie::open(H256::zero(), &store).is_ok());
        assert!(Trie::open(KECCAK_NULL_RLP, &store).is_ok());
    }

    #[test]
    fn open_at_unknown_root_is_a_missing_node_error() {
        common_setup();
        let store = MemStore::new();
        let bogus = H256::repeat_byte(0xaa);
        assert!(matches!(
            Trie::open(bogus, &store),
            Err(TrieError::MissingNode(h)) if h == bogus
        ));
    }

    #[test]
    fn inserted_values_are_retrievable() -> TrieResult<()> {
        common_setup();
        let store = MemStore::new();
        let mut trie = Trie::empty(&store);
        for (key, value) in random_entries(MASS_TRIE_SIZE, 0) {
            trie.insert(&key, value)?;
        }
        for (key, value) in random_entries(MASS_TRIE_SIZE, 0) {
            assert_eq!(trie.get(&key)?, Some(value));
        }
        assert_eq!(trie.get(&[0u8; 32])?, None);
        Ok(())
    }

    #[test]
    fn updating_an_existing_key_replaces_the_value() -> TrieResult<()> {
        common_setup();
        let store = MemStore::new();
        let mut trie = Trie::empty(&store);
        let key = [0x12u8; 32];
        trie.insert(&key, vec![1])?;
        trie.insert(&key, vec![2, 3])?;
        assert_eq!(trie.get(&key)?, Some(vec![2, 3]));
        Ok(())
    }

    #[test]
    fn root_is_independent_of_insertion_order() -> TrieResult<()> {
        common_setup();
        let store = MemStore::new();
        let entries = random_entries(200, 1);

        let mut forward = Trie::empty(&store);
        for (key, value) in &entries {
            forward.insert(key, value.clone())?;
        }
        let mut reverse = Trie::empty(&store);
        for (key, value) in entries.iter().rev() {
            reverse.insert(key, value.clone())?;
        }
        assert_eq!(forward.hash(), reverse.hash());
        Ok(())
    }

    #[test]
    fn hash_equals_commit_root() -> TrieResult<()> {
        common_setup();
        let store = MemStore::new();
        let mut trie = Trie::empty(&store);
        for (key, value) in random_entries(300, 2) {
            trie.insert(&key, value)?;
        }
        let mut batch = WriteBatch::new();
        assert_eq!(trie.hash(), trie.commit(&mut batch));
        Ok(())
    }

    #[test]
    fn committed_trie_is_readable_after_reopen() -> TrieResult<()> {
        common_setup();
        let store = MemStore::new();
        let entries = random_entries(MASS_TRIE_SIZE, 3);

        let mut trie = Trie::empty(&store);
        for (key, value) in &entries {
            trie.insert(key, value.clone())?;
        }
        let mut batch = WriteBatch::new();
        let root = trie.commit(&mut batch);
        store.write(batch).map_err(TrieError::Store)?;

        let reopened = Trie::open(root, &store)?;
        for (key, value) in &entries {
            assert_eq!(reopened.get(key)?, Some(value.clone()));
        }
        assert_eq!(reopened.hash(), root);
        Ok(())
    }

    #[test]
    fn incremental_commits_layer_over_each_other() -> TrieResult<()> {
        common_setup();
        let store = MemStore::new();
        let first = random_entries(400, 4);
        let second = random_entries(400, 5);

        let mut trie = Trie::empty(&store);
        for (key, value) in &first {
            trie.insert(key, value.clone())?;
        }
        let mut batch = WriteBatch::new();
        let root = trie.commit(&mut batch);
        store.write(batch).map_err(TrieError::Store)?;

        let mut trie = Trie::open(root, &store)?;
        for (key, value) in &second {
            trie.insert(key, value.clone())?;
        }
        let mut batch = WriteBatch::new();
        let root = trie.commit(&mut batch);
        store.write(batch).map_err(TrieError::Store)?;

        let reopened = Trie::open(root, &store)?;
        for (key, value) in first.iter().chain(&second) {
            assert_eq!(reopened.get(key)?, Some(value.clone()));
        }
        Ok(())
    }

    #[test]
    fn removal_restores_the_prior_root() -> TrieResult<()> {
        common_setup();
        let store = MemStore::new();
        let entries = random_entries(100, 6);

        let mut trie = Trie::empty(&store);
        for (key, value) in &entries {
            trie.insert(key, value.clone())?;
        }
        let baseline = trie.hash();

        let extra_key = [0x77u8; 32];
        trie.insert(&extra_key, vec![42])?;
        assert_ne!(trie.hash(), baseline);

        assert_eq!(trie.remove(&extra_key)?, Some(vec![42]));
        assert_eq!(trie.hash(), baseline);
        assert_eq!(trie.get(&extra_key)?, None);
        Ok(())
    }

    #[test]
    fn removing_every_key_leaves_the_empty_root() -> TrieResult<()> {
        common_setup();
        let store = MemStore::new();
        let entries = random_entries(64, 7);

        let mut trie = Trie::empty(&store);
        for (key, value) in &entries {
            trie.insert(key, value.clone())?;
        }
        for (key, value) in &entries {
            assert_eq!(trie.remove(key)?, Some(value.clone()));
        }
        assert_eq!(trie.hash(), KECCAK_NULL_RLP);
        Ok(())
    }

    #[test]
    fn removing_an_absent_key_is_a_no_op() -> TrieResult<()> {
        common_setup();
        let store = MemStore::new();
        let mut trie = Trie::empty(&store);
        trie.insert(&[0x11u8; 32], vec![1])?;
        let before = trie.hash();
        assert_eq!(trie.remove(&[0x22u8; 32])?, None);
        assert_eq!(trie.hash(), before);
        Ok(())
    }

    #[test]
    fn removal_works_across_a_commit_boundary() -> TrieResult<()> {
        common_setup();
        let store = MemStore::new();
        let entries = random_entries(200, 8);

        let mut trie = Trie::empty(&store);
        for (key, value) in &entries {
            trie.insert(key, value.clone())?;
        }
        let mut batch = WriteBatch::new();
        let root = trie.commit(&mut batch);
        store.write(batch).map_err(TrieError::Store)?;

        // Delete half of the persisted entries through a fresh trie, forcing
        // resolution of stored nodes on the removal path.
        let mut trie = Trie::open(root, &store)?;
        let (gone, kept) = entries.split_at(entries.len() / 2);
        for (key, value) in gone {
            assert_eq!(trie.remove(key)?, Some(value.clone()));
        }
        for (key, value) in kept {
            assert_eq!(trie.get(key)?, Some(value.clone()));
        }

        // The pruned trie must hash identically to one built from scratch
        // with only the kept entries.
        let fresh_store = MemStore::new();
        let mut fresh = Trie::empty(&fresh_store);
        for (key, value) in kept {
            fresh.insert(key, value.clone())?;
        }
        assert_eq!(trie.hash(), fresh.hash());
        Ok(())
    }

    #[test]
    fn inserting_an_empty_value_removes_the_key() -> TrieResult<()> {
        common_setup();
        let store = MemStore::new();
        let mut trie = Trie::empty(&store);
        let key = [0x31u8; 32];
        trie.insert(&key, vec![5])?;
        trie.insert(&key, Vec::new())?;
        assert_eq!(trie.get(&key)?, None);
        assert_eq!(trie.hash(), KECCAK_NULL_RLP);
        Ok(())
    }
}

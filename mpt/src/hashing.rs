//! Folding nodes into their RLP encodings, for hashing and for committing.

use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::{keccak, KECCAK_NULL_RLP};
use kv::WriteBatch;
use rlp::RlpStream;

use crate::node::Node;

/// The encoded form of a node as seen by its parent: nodes under 32 bytes are
/// inlined verbatim, larger nodes are referenced by the hash of their
/// encoding.
#[derive(Clone, Debug)]
pub(crate) enum EncodedNode {
    /// RLP under 32 bytes, embedded into the parent.
    Raw(Bytes),
    /// Hash reference to a full node.
    Hashed([u8; 32]),
}

/// Folds `node` bottom-up into its encoded form. Every node whose encoding
/// reaches 32 bytes is reported to `sink` as a `(hash, encoding)` pair; pass
/// a no-op sink to compute hashes without collecting nodes.
pub(crate) fn encode_node(node: &Node, sink: &mut dyn FnMut(H256, &[u8])) -> EncodedNode {
    match node {
        Node::Empty => EncodedNode::Raw(Bytes::from_static(&rlp::NULL_RLP)),
        Node::Hash(h) => EncodedNode::Hashed(h.0),
        _ => {
            let raw = encode_body(node, sink);
            if raw.len() >= 32 {
                let hash = keccak(&raw);
                sink(hash, &raw);
                EncodedNode::Hashed(hash.0)
            } else {
                EncodedNode::Raw(raw)
            }
        }
    }
}

fn encode_body(node: &Node, sink: &mut dyn FnMut(H256, &[u8])) -> Bytes {
    match node {
        Node::Branch { children, value } => {
            let mut stream = RlpStream::new_list(17);
            for child in children.iter() {
                append_child(&mut stream, encode_node(child, sink));
            }
            match value.is_empty() {
                false => stream.append(value),
                true => stream.append_empty_data(),
            };
            stream.out().freeze()
        }
        Node::Extension { path, child } => {
            let mut stream = RlpStream::new_list(2);
            stream.append(&path.to_hex_prefix(false));
            append_child(&mut stream, encode_node(child, sink));
            stream.out().freeze()
        }
        Node::Leaf { path, value } => {
            let mut stream = RlpStream::new_list(2);
            stream.append(&path.to_hex_prefix(true));
            stream.append(value);
            stream.out().freeze()
        }
        Node::Empty | Node::Hash(_) => unreachable!("handled by encode_node"),
    }
}

fn append_child(stream: &mut RlpStream, child: EncodedNode) {
    match child {
        EncodedNode::Raw(bytes) => stream.append_raw(&bytes, 1),
        EncodedNode::Hashed(hash) => stream.append(&hash.as_ref()),
    };
}

/// Root hash of `node` without persisting anything.
pub(crate) fn hash_root(node: &Node) -> H256 {
    match encode_node(node, &mut |_, _| {}) {
        EncodedNode::Raw(raw) => keccak(&raw),
        EncodedNode::Hashed(hash) => H256(hash),
    }
}

/// Serializes every dirty node reachable from `node` into `batch` and
/// returns the root hash. The root node is always persisted under its hash,
/// regardless of its encoded size, so the trie can be reopened at the
/// returned root once the batch lands.
pub(crate) fn commit_root(node: &Node, batch: &mut WriteBatch) -> H256 {
    if node.is_empty() {
        return KECCAK_NULL_RLP;
    }
    let mut sink = |hash: H256, bytes: &[u8]| batch.put(hash.as_bytes(), bytes);
    match encode_node(node, &mut sink) {
        EncodedNode::Hashed(hash) => H256(hash),
        EncodedNode::Raw(raw) => {
            let hash = keccak(&raw);
            batch.put(hash.as_bytes(), &raw);
            hash
        }
    }
}

#[cfg(test)]
pub(crate) fn encode_for_test(node: &Node) -> Vec<u8> {
    match node {
        Node::Empty => rlp::NULL_RLP.to_vec(),
        Node::Hash(h) => h.as_bytes().to_vec(),
        _ => encode_body(node, &mut |_, _| {}).to_vec(),
    }
}

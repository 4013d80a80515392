//! The in-memory node model and the codec for nodes persisted in the store.

use std::fmt::{self, Display};
use std::sync::Arc;

use ethereum_types::H256;
use rlp::{DecoderError, Rlp};

use crate::nibbles::Nibbles;
use crate::TrieError;

/// Alias for a node that is a child of an extension or branch node.
///
/// Children are reference-counted so that rebuilding a path on insert shares
/// every untouched sibling with the previous version of the trie.
pub type WrappedNode = Arc<Node>;

/// A trie node.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Node {
    /// An empty (sub)trie.
    #[default]
    Empty,
    /// A subtree that lives in the store, referenced by the hash of its
    /// encoding. Resolved on demand during descent.
    Hash(H256),
    /// A branch node: 16 children and an optional value.
    Branch {
        /// One child per next-nibble.
        children: [WrappedNode; 16],
        /// The payload of a key ending at this node. Always empty when every
        /// key in the trie has the same length, as is the case under hashed
        /// keys; kept for encoding fidelity.
        value: Vec<u8>,
    },
    /// An extension node: a shared path segment and a single child.
    Extension {
        /// The path segment this extension covers.
        path: Nibbles,
        /// The child below the segment.
        child: WrappedNode,
    },
    /// A leaf node: the remaining path and the stored value.
    Leaf {
        /// The remainder of the key.
        path: Nibbles,
        /// The payload of this node.
        value: Vec<u8>,
    },
}

impl Node {
    /// Whether this is the [`Node::Empty`] variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    /// Short tag for logging.
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Node::Empty => NodeKind::Empty,
            Node::Hash(_) => NodeKind::Hash,
            Node::Branch { .. } => NodeKind::Branch,
            Node::Extension { .. } => NodeKind::Extension,
            Node::Leaf { .. } => NodeKind::Leaf,
        }
    }
}

/// Fresh array of 16 empty children.
pub(crate) fn empty_children() -> [WrappedNode; 16] {
    std::array::from_fn(|_| WrappedNode::from(Node::Empty))
}

/// Simplified node type to make logging cleaner.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum NodeKind {
    Empty,
    Hash,
    Branch,
    Extension,
    Leaf,
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Empty => "Empty",
            NodeKind::Hash => "Hash",
            NodeKind::Branch => "Branch",
            NodeKind::Extension => "Extension",
            NodeKind::Leaf => "Leaf",
        };
        write!(f, "{s}")
    }
}

/// Decodes a stored node from its RLP encoding.
pub(crate) fn decode_node(bytes: &[u8]) -> Result<Node, TrieError> {
    let rlp = Rlp::new(bytes);
    match rlp.item_count()? {
        17 => {
            let mut children = empty_children();
            for (i, child) in children.iter_mut().enumerate() {
                *child = decode_child(rlp.at(i)?)?;
            }
            let value = rlp.at(16)?.data()?;
            Ok(Node::Branch {
                children,
                value: value.to_vec(),
            })
        }
        2 => {
            let (path, is_leaf) = Nibbles::from_hex_prefix(rlp.at(0)?.data()?)?;
            if is_leaf {
                let value = rlp.at(1)?.data()?;
                Ok(Node::Leaf {
                    path,
                    value: value.to_vec(),
                })
            } else {
                Ok(Node::Extension {
                    path,
                    child: decode_child(rlp.at(1)?)?,
                })
            }
        }
        _ => Err(TrieError::Decode(DecoderError::Custom(
            "trie node is neither a branch nor a short node",
        ))),
    }
}

/// Decodes one child slot of a branch or extension node: an empty string is
/// an empty child, a 32-byte string is a hash reference, and a nested list is
/// a node whose encoding was under 32 bytes and got inlined into its parent.
fn decode_child(rlp: Rlp<'_>) -> Result<WrappedNode, TrieError> {
    if rlp.is_data() {
        let data = rlp.data()?;
        match data.len() {
            0 => Ok(Node::Empty.into()),
            32 => Ok(Node::Hash(H256::from_slice(data)).into()),
            _ => Err(TrieError::Decode(DecoderError::Custom(
                "trie child reference is neither empty nor a 32-byte hash",
            ))),
        }
    } else {
        Ok(decode_node(rlp.as_raw())?.into())
    }
}

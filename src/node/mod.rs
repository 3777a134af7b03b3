//! Node model for the merkle AVL tree.
//!
//! Leaves carry the stored key/value pairs; inner nodes route lookups by key
//! and commit to both children by hash. A child slot is either materialized
//! or known only by its commitment: a deep subtree is exactly a tree in
//! which some slots were never witnessed by a proof.

use std::cmp::max;

use digest::Digest;

use crate::prelude::*;

pub(crate) mod codec;

use codec::{write_bytes, write_varint};

/// A child slot of an inner node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    /// Subtree known only by its hash; no proof has witnessed its contents.
    Unwitnessed(Hash),
    /// Materialized subtree.
    Witnessed(Box<Node>),
}

impl Child {
    /// The merkle commitment of the subtree in this slot.
    pub fn hash(&self) -> Hash {
        match self {
            Child::Unwitnessed(hash) => *hash,
            Child::Witnessed(node) => node.hash,
        }
    }

    pub fn is_witnessed(&self) -> bool {
        matches!(self, Child::Witnessed(_))
    }

    /// The materialized node, if any.
    pub fn node(&self) -> Option<&Node> {
        match self {
            Child::Witnessed(node) => Some(node),
            Child::Unwitnessed(_) => None,
        }
    }

    /// Height of the subtree; unknown for unwitnessed slots.
    pub(crate) fn height(&self) -> Result<i8> {
        match self {
            Child::Witnessed(node) => Ok(node.height),
            Child::Unwitnessed(hash) => Err(Error::UnwitnessedSubtree(*hash)),
        }
    }

    /// Leaf count of the subtree; unknown for unwitnessed slots.
    pub(crate) fn size(&self) -> Result<i64> {
        match self {
            Child::Witnessed(node) => Ok(node.size),
            Child::Unwitnessed(hash) => Err(Error::UnwitnessedSubtree(*hash)),
        }
    }
}

/// Payload distinguishing leaves from inner nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Leaf {
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Inner {
        /// Routing key: the smallest key of the right subtree on a
        /// fully-hydrated tree. Never hashed.
        key: Vec<u8>,
        left: Child,
        right: Child,
    },
}

/// A single tree node with its memoized commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub(crate) version: i64,
    pub(crate) height: i8,
    pub(crate) size: i64,
    pub(crate) hash: Hash,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub fn leaf<D: Digest>(key: Vec<u8>, value: Vec<u8>, version: i64) -> Self {
        let mut node = Self {
            version,
            height: 0,
            size: 1,
            hash: Hash::zero(),
            kind: NodeKind::Leaf { key, value },
        };
        node.hash = node.compute_hash::<D>();
        node
    }

    /// Builds an inner node, deriving height and size from its children.
    pub fn inner<D: Digest>(key: Vec<u8>, left: Child, right: Child, version: i64) -> Result<Self> {
        let height = 1 + max(left.height()?, right.height()?);
        let size = left.size()? + right.size()?;
        Ok(Self::inner_with_meta::<D>(key, left, right, height, size, version))
    }

    /// Builds an inner node with caller-supplied height and size, for when
    /// the shape of the subtree is already known: proof skeletons, and spine
    /// rebuilds that replace a leaf without changing the tree's shape.
    pub fn inner_with_meta<D: Digest>(
        key: Vec<u8>,
        left: Child,
        right: Child,
        height: i8,
        size: i64,
        version: i64,
    ) -> Self {
        let mut node = Self {
            version,
            height,
            size,
            hash: Hash::zero(),
            kind: NodeKind::Inner { key, left, right },
        };
        node.hash = node.compute_hash::<D>();
        node
    }

    /// The memoized commitment of this node.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn height(&self) -> i8 {
        self.height
    }

    /// Number of leaves under this node.
    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    /// Recomputes the commitment from the canonical encoding, ignoring the
    /// memoized value:
    ///
    /// * leaf: `H(varint(0) || varint(1) || varint(version) || len(key) || key || len(H(value)) || H(value))`
    /// * inner: `H(varint(height) || varint(size) || varint(version) || 0x20 || left || 0x20 || right)`
    pub fn compute_hash<D: Digest>(&self) -> Hash {
        let mut buf = Vec::with_capacity(16 + 2 * 33);
        write_varint(&mut buf, i64::from(self.height));
        write_varint(&mut buf, self.size);
        write_varint(&mut buf, self.version);
        match &self.kind {
            NodeKind::Leaf { key, value } => {
                write_bytes(&mut buf, key);
                write_bytes(&mut buf, Hash::digest::<D>(value).as_ref());
            }
            NodeKind::Inner { left, right, .. } => {
                write_bytes(&mut buf, left.hash().as_ref());
                write_bytes(&mut buf, right.hash().as_ref());
            }
        }
        Hash::digest::<D>(&buf)
    }

    /// Smallest key among the witnessed leaves of this subtree, or `None`
    /// when no leaf below has been witnessed.
    pub fn lowest_key(&self) -> Option<Vec<u8>> {
        match &self.kind {
            NodeKind::Leaf { key, .. } => Some(key.clone()),
            NodeKind::Inner { left, right, .. } => {
                let left = left.node().and_then(Node::lowest_key);
                let right = right.node().and_then(Node::lowest_key);
                match (left, right) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            }
        }
    }

    /// Largest key among the witnessed leaves of this subtree.
    pub fn highest_key(&self) -> Option<Vec<u8>> {
        match &self.kind {
            NodeKind::Leaf { key, .. } => Some(key.clone()),
            NodeKind::Inner { left, right, .. } => {
                let left = left.node().and_then(Node::highest_key);
                let right = right.node().and_then(Node::highest_key);
                match (left, right) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                }
            }
        }
    }

    /// The persisted form of this node: children demoted to their hashes.
    pub fn skeleton(&self) -> Node {
        match &self.kind {
            NodeKind::Leaf { .. } => self.clone(),
            NodeKind::Inner { key, left, right } => Node {
                version: self.version,
                height: self.height,
                size: self.size,
                hash: self.hash,
                kind: NodeKind::Inner {
                    key: key.clone(),
                    left: Child::Unwitnessed(left.hash()),
                    right: Child::Unwitnessed(right.hash()),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use sha2::Sha256;

    use super::*;

    fn inner_over(left: Node, right: Node) -> Node {
        Node::inner::<Sha256>(
            right.lowest_key().unwrap(),
            Child::Witnessed(Box::new(left)),
            Child::Witnessed(Box::new(right)),
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_inner_metadata_follows_children() {
        let a = Node::leaf::<Sha256>(b"a".to_vec(), b"1".to_vec(), 1);
        let b = Node::leaf::<Sha256>(b"b".to_vec(), b"2".to_vec(), 1);
        let inner = inner_over(a, b);

        assert_eq!(inner.height(), 1);
        assert_eq!(inner.size(), 2);
        assert!(!inner.is_leaf());
        assert_eq!(inner.lowest_key(), Some(b"a".to_vec()));
        assert_eq!(inner.highest_key(), Some(b"b".to_vec()));
    }

    #[test]
    fn test_skeleton_preserves_hash() {
        let a = Node::leaf::<Sha256>(b"a".to_vec(), b"1".to_vec(), 1);
        let b = Node::leaf::<Sha256>(b"b".to_vec(), b"2".to_vec(), 1);
        let inner = inner_over(a, b);
        let skeleton = inner.skeleton();

        assert_eq!(skeleton.hash(), inner.hash());
        assert_eq!(skeleton.compute_hash::<Sha256>(), inner.hash());
        let NodeKind::Inner { left, right, .. } = skeleton.kind() else {
            panic!("skeleton of an inner node must stay inner");
        };
        assert!(!left.is_witnessed());
        assert!(!right.is_witnessed());
    }

    #[test]
    fn test_extreme_keys_skip_unwitnessed_subtrees() {
        let b = Node::leaf::<Sha256>(b"b".to_vec(), b"2".to_vec(), 1);
        let inner = Node::inner_with_meta::<Sha256>(
            b"b".to_vec(),
            Child::Unwitnessed(Hash::zero()),
            Child::Witnessed(Box::new(b)),
            1,
            2,
            1,
        );

        assert_eq!(inner.lowest_key(), Some(b"b".to_vec()));
        assert_eq!(inner.highest_key(), Some(b"b".to_vec()));
    }

    proptest! {
        #[test]
        fn test_leaf_hash_covers_every_field(
            key in proptest::collection::vec(any::<u8>(), 1..8),
            value in proptest::collection::vec(any::<u8>(), 1..8),
            version in 1i64..1000,
        ) {
            let leaf = Node::leaf::<Sha256>(key.clone(), value.clone(), version);
            prop_assert_eq!(leaf.hash(), leaf.compute_hash::<Sha256>());

            let bumped = Node::leaf::<Sha256>(key.clone(), value.clone(), version + 1);
            prop_assert_ne!(leaf.hash(), bumped.hash());

            let mut other_key = key.clone();
            other_key.push(0);
            let moved = Node::leaf::<Sha256>(other_key, value.clone(), version);
            prop_assert_ne!(leaf.hash(), moved.hash());

            let mut other_value = value.clone();
            other_value.push(0);
            let rewritten = Node::leaf::<Sha256>(key, other_value, version);
            prop_assert_ne!(leaf.hash(), rewritten.hash());
        }

        #[test]
        fn test_routing_key_is_not_hashed(
            key_a in proptest::collection::vec(any::<u8>(), 1..8),
            key_b in proptest::collection::vec(any::<u8>(), 1..8),
        ) {
            let a = Node::leaf::<Sha256>(b"a".to_vec(), b"1".to_vec(), 1);
            let b = Node::leaf::<Sha256>(b"b".to_vec(), b"2".to_vec(), 1);
            let left = Child::Witnessed(Box::new(a));
            let right = Child::Witnessed(Box::new(b));
            let one = Node::inner::<Sha256>(key_a, left.clone(), right.clone(), 1).unwrap();
            let other = Node::inner::<Sha256>(key_b, left, right, 1).unwrap();
            prop_assert_eq!(one.hash(), other.hash());
        }
    }
}

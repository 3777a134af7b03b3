//! Existence proofs and the hydration parser.
//!
//! A proof carries a leaf plus the ordered chain of inner ops that rebuilds
//! the root commitment from it. Each op is a prefix/suffix byte pair: the
//! prefix holds the parent's metadata varints and, when the running hash is
//! the right child, the left sibling hash; the suffix holds the right
//! sibling hash when the running hash is the left child. Exactly one side is
//! ever absent: the absent slot is where the running hash goes.

use digest::Digest;
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;

use crate::node::codec::{write_varint, Reader};
use crate::prelude::*;

/// Length prefix preceding each 32-byte child hash in an op.
pub(crate) const HASH_LENGTH_BYTE: u8 = 0x20;

/// Leaf encoding header: `varint(0) || varint(1) || varint(version)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafOp {
    pub prefix: Vec<u8>,
}

impl LeafOp {
    pub(crate) fn for_version(version: i64) -> Self {
        let mut prefix = Vec::with_capacity(12);
        write_varint(&mut prefix, 0);
        write_varint(&mut prefix, 1);
        write_varint(&mut prefix, version);
        Self { prefix }
    }
}

/// One step of the path from a leaf toward the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerOp {
    pub prefix: Vec<u8>,
    pub suffix: Vec<u8>,
}

/// Witness that `(key, value)` is present under some root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistenceProof {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub leaf: LeafOp,
    /// Inner ops ordered from the leaf's parent out to the root.
    pub path: Vec<InnerOp>,
}

/// Witness that a key is absent, via its BST neighbors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonExistenceProof {
    pub key: Vec<u8>,
    pub left: Option<ExistenceProof>,
    pub right: Option<ExistenceProof>,
}

impl ExistenceProof {
    /// Decodes the proof into owned nodes (the leaf, then one inner
    /// skeleton per op walking outward) and the reconstructed root hash.
    pub fn parse_nodes<D: Digest>(&self) -> Result<(Vec<Node>, Hash)> {
        let leaf = node_from_leaf_op::<D>(&self.leaf, &self.key, &self.value)?;
        let mut prev = leaf.hash();
        let mut nodes = vec![leaf];
        for op in &self.path {
            let inner = node_from_inner_op::<D>(op, prev)?;
            prev = inner.hash();
            nodes.push(inner);
        }
        Ok((nodes, prev))
    }
}

pub(crate) fn node_from_leaf_op<D: Digest>(op: &LeafOp, key: &[u8], value: &[u8]) -> Result<Node> {
    let mut reader = Reader::new(&op.prefix);
    let height = reader.read_varint()?;
    if height != 0 {
        return Err(Error::MalformedProof(format!(
            "leaf height {height}, expected 0"
        )));
    }
    let size = reader.read_varint()?;
    if size != 1 {
        return Err(Error::MalformedProof(format!(
            "leaf size {size}, expected 1"
        )));
    }
    let version = reader.read_varint()?;
    if !reader.is_empty() {
        return Err(Error::MalformedProof(
            "trailing bytes after leaf prefix".to_string(),
        ));
    }
    Ok(Node::leaf::<D>(key.to_vec(), value.to_vec(), version))
}

pub(crate) fn node_from_inner_op<D: Digest>(op: &InnerOp, prev: Hash) -> Result<Node> {
    let mut reader = Reader::new(&op.prefix);
    let height = reader.read_varint()?;
    let size = reader.read_varint()?;
    let version = reader.read_varint()?;
    if reader.read_byte()? != HASH_LENGTH_BYTE {
        return Err(Error::MalformedProof(
            "expected length byte 0x20 in prefix".to_string(),
        ));
    }

    let mut left = None;
    if !reader.is_empty() {
        left = Some(Hash::from_bytes(reader.read_exact(32)?)?);
        if reader.read_byte()? != HASH_LENGTH_BYTE {
            return Err(Error::MalformedProof(
                "expected length byte 0x20 after left hash".to_string(),
            ));
        }
        if !reader.is_empty() {
            return Err(Error::MalformedProof(
                "trailing bytes after inner prefix".to_string(),
            ));
        }
    }

    let mut right = None;
    if !op.suffix.is_empty() {
        let mut reader = Reader::new(&op.suffix);
        if reader.read_byte()? != HASH_LENGTH_BYTE {
            return Err(Error::MalformedProof(
                "expected length byte 0x20 in suffix".to_string(),
            ));
        }
        right = Some(Hash::from_bytes(reader.read_exact(32)?)?);
        if !reader.is_empty() {
            return Err(Error::MalformedProof(
                "trailing bytes after inner suffix".to_string(),
            ));
        }
    }

    // The absent side is the slot the running hash occupies.
    let (left, right) = match (left, right) {
        (Some(left), None) => (left, prev),
        (None, Some(right)) => (prev, right),
        (Some(_), Some(_)) => {
            return Err(Error::MalformedProof(
                "both sibling hashes present".to_string(),
            ))
        }
        (None, None) => {
            return Err(Error::MalformedProof(
                "no sibling hash present".to_string(),
            ))
        }
    };

    let height = i8::try_from(height)
        .map_err(|_| Error::MalformedProof(format!("inner height {height} out of range")))?;
    Ok(Node::inner_with_meta::<D>(
        Vec::new(),
        Child::Unwitnessed(left),
        Child::Unwitnessed(right),
        height,
        size,
        version,
    ))
}

impl Arbitrary for LeafOp {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        any::<Vec<u8>>().prop_map(|prefix| LeafOp { prefix }).boxed()
    }
}

impl Arbitrary for InnerOp {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (any::<Vec<u8>>(), any::<Vec<u8>>())
            .prop_map(|(prefix, suffix)| InnerOp { prefix, suffix })
            .boxed()
    }
}

impl Arbitrary for ExistenceProof {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (
            any::<Vec<u8>>(),
            any::<Vec<u8>>(),
            any::<LeafOp>(),
            proptest::collection::vec(any::<InnerOp>(), 0..4),
        )
            .prop_map(|(key, value, leaf, path)| ExistenceProof {
                key,
                value,
                leaf,
                path,
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use sha2::Sha256;

    use super::*;

    #[test]
    fn test_leaf_op_roundtrips_through_the_parser() {
        let leaf = Node::leaf::<Sha256>(b"a".to_vec(), b"1".to_vec(), 7);
        let parsed =
            node_from_leaf_op::<Sha256>(&LeafOp::for_version(7), b"a", b"1").unwrap();
        assert_eq!(parsed, leaf);
    }

    #[test]
    fn test_leaf_op_rejects_nonzero_height() {
        let mut prefix = Vec::new();
        crate::node::codec::write_varint(&mut prefix, 2);
        crate::node::codec::write_varint(&mut prefix, 1);
        crate::node::codec::write_varint(&mut prefix, 1);
        let err = node_from_leaf_op::<Sha256>(&LeafOp { prefix }, b"a", b"1").unwrap_err();
        assert!(matches!(err, Error::MalformedProof(_)));
    }

    #[test]
    fn test_inner_op_rejects_bad_sentinel() {
        let mut prefix = Vec::new();
        crate::node::codec::write_varint(&mut prefix, 1);
        crate::node::codec::write_varint(&mut prefix, 2);
        crate::node::codec::write_varint(&mut prefix, 1);
        prefix.push(0x21);
        let op = InnerOp {
            prefix,
            suffix: Vec::new(),
        };
        let err = node_from_inner_op::<Sha256>(&op, Hash::zero()).unwrap_err();
        assert!(matches!(err, Error::MalformedProof(_)));
    }

    #[test]
    fn test_inner_op_requires_exactly_one_sibling() {
        // A prefix carrying a left sibling plus a suffix carrying a right
        // one leaves no slot for the running hash.
        let mut prefix = Vec::new();
        crate::node::codec::write_varint(&mut prefix, 1);
        crate::node::codec::write_varint(&mut prefix, 2);
        crate::node::codec::write_varint(&mut prefix, 1);
        prefix.push(HASH_LENGTH_BYTE);
        prefix.extend_from_slice(Hash::zero().as_ref());
        prefix.push(HASH_LENGTH_BYTE);
        let mut suffix = vec![HASH_LENGTH_BYTE];
        suffix.extend_from_slice(Hash::zero().as_ref());
        let op = InnerOp { prefix, suffix };
        let err = node_from_inner_op::<Sha256>(&op, Hash::zero()).unwrap_err();
        assert!(matches!(err, Error::MalformedProof(_)));
    }

    proptest::proptest! {
        #[test]
        fn test_parser_never_panics(proof: ExistenceProof) {
            let _ = proof.parse_nodes::<Sha256>();
        }
    }
}

//! Shared proptest strategies and invariant checks for the test suites.

use digest::Digest;
use itertools::Itertools;
use proptest::{
    collection::{vec, SizeRange},
    prelude::*,
};

use crate::prelude::*;

/// Short keys drawn from a small alphabet, so random operation sequences
/// collide often enough to exercise updates and removals of present keys.
pub fn keys() -> impl Strategy<Value = Vec<u8>> {
    vec(prop::sample::select(&b"abcdefgh"[..]), 1..=3)
}

/// Non-empty values.
pub fn values() -> impl Strategy<Value = Vec<u8>> {
    vec(any::<u8>(), 1..8)
}

/// Sorted, key-deduplicated key/value pairs.
pub fn key_value_pairs(size: impl Into<SizeRange>) -> impl Strategy<Value = Vec<(Vec<u8>, Vec<u8>)>> {
    vec((keys(), values()), size).prop_map(|pairs| {
        pairs
            .into_iter()
            .unique_by(|(key, _)| key.clone())
            .sorted()
            .collect_vec()
    })
}

/// A single tree mutation.
#[derive(Debug, Clone)]
pub enum Op {
    Set(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
}

/// Random interleavings of sets and removes.
pub fn operations(size: impl Into<SizeRange>) -> impl Strategy<Value = Vec<Op>> {
    vec(
        prop_oneof![
            3 => (keys(), values()).prop_map(|(key, value)| Op::Set(key, value)),
            1 => keys().prop_map(Op::Remove),
        ],
        size,
    )
}

/// Walks a subtree checking the merkle and AVL invariants over the
/// witnessed nodes: memoized hashes match a fresh recomputation, heights,
/// sizes and balance factors agree with the children, and routing keys
/// order the witnessed leaves.
pub fn assert_invariants<D: Digest>(node: &Node) {
    assert_eq!(
        node.hash(),
        node.compute_hash::<D>(),
        "memoized hash out of date"
    );
    match node.kind() {
        NodeKind::Leaf { .. } => {
            assert_eq!(node.height(), 0, "leaf height must be 0");
            assert_eq!(node.size(), 1, "leaf size must be 1");
        }
        NodeKind::Inner { key, left, right } => {
            if let (Some(left), Some(right)) = (left.node(), right.node()) {
                assert_eq!(node.height(), 1 + left.height().max(right.height()));
                assert_eq!(node.size(), left.size() + right.size());
                assert!(
                    (i16::from(left.height()) - i16::from(right.height())).abs() <= 1,
                    "AVL balance violated at {}",
                    node.hash()
                );
            }
            if right.is_witnessed() {
                if let Some(highest) = left.node().and_then(Node::highest_key) {
                    assert!(
                        highest.as_slice() < key.as_slice(),
                        "left subtree reaches past the routing key"
                    );
                }
                if let Some(lowest) = right.node().and_then(Node::lowest_key) {
                    assert!(
                        key.as_slice() <= lowest.as_slice(),
                        "routing key reaches past the right subtree"
                    );
                }
            } else if let Some(highest) = left.node().and_then(Node::highest_key) {
                // With the right side dark the routing key is approximated
                // by the highest witnessed key on the left.
                assert!(highest.as_slice() <= key.as_slice());
            }
            for child in [left, right] {
                if let Some(child) = child.node() {
                    assert_invariants::<D>(child);
                }
            }
        }
    }
}

//! Proof construction and the proof-sufficiency planner.
//!
//! The planner answers one question: which existence proofs must a deep
//! subtree ingest so that a prospective mutation runs to completion? The
//! answer is derived from the mutation engine's failure points rather than
//! from minimality: an update touches no sibling metadata, so a bare
//! membership proof suffices; an insert or removal recomputes heights and
//! sizes along its path and may rotate, so every off-path sibling the
//! rebalance can consult must be witnessed too. Over-approximating is fine;
//! correctness requires only that hydrated mutations succeed.

use std::collections::BTreeSet;

use digest::Digest;

use crate::node::codec::write_varint;
use crate::prelude::*;
use crate::proof::HASH_LENGTH_BYTE;

use super::Tree;

impl<D: Digest> Tree<D> {
    /// Existence proof for a present key.
    pub fn membership_proof(&self, key: &[u8]) -> Result<ExistenceProof> {
        let mut node = self
            .root()
            .ok_or_else(|| Error::KeyNotFound(key.to_vec()))?;
        let mut ops: Vec<InnerOp> = Vec::new();
        loop {
            match &node.kind {
                NodeKind::Leaf {
                    key: leaf_key,
                    value,
                } => {
                    if leaf_key.as_slice() != key {
                        return Err(Error::KeyNotFound(key.to_vec()));
                    }
                    // Collected root-first; the wire order runs leaf to root.
                    ops.reverse();
                    return Ok(ExistenceProof {
                        key: key.to_vec(),
                        value: value.clone(),
                        leaf: LeafOp::for_version(node.version()),
                        path: ops,
                    });
                }
                NodeKind::Inner {
                    key: routing_key,
                    left,
                    right,
                } => {
                    let mut prefix = Vec::with_capacity(64);
                    write_varint(&mut prefix, i64::from(node.height()));
                    write_varint(&mut prefix, node.size());
                    write_varint(&mut prefix, node.version());
                    prefix.push(HASH_LENGTH_BYTE);
                    let (next, suffix) = if key < routing_key.as_slice() {
                        // The running hash sits on the left; the right
                        // sibling rides in the suffix.
                        let mut suffix = Vec::with_capacity(33);
                        suffix.push(HASH_LENGTH_BYTE);
                        suffix.extend_from_slice(right.hash().as_ref());
                        (left, suffix)
                    } else {
                        prefix.extend_from_slice(left.hash().as_ref());
                        prefix.push(HASH_LENGTH_BYTE);
                        (right, Vec::new())
                    };
                    ops.push(InnerOp { prefix, suffix });
                    node = next
                        .node()
                        .ok_or_else(|| Error::UnwitnessedSubtree(next.hash()))?;
                }
            }
        }
    }

    /// Neighbor proofs witnessing that `key` is absent.
    pub fn non_membership_proof(&self, key: &[u8]) -> Result<NonExistenceProof> {
        if self.get(key).is_some() {
            return Err(Error::ElementExists);
        }
        let left = self
            .predecessor(key)
            .map(|neighbor| self.membership_proof(&neighbor))
            .transpose()?;
        let right = self
            .successor(key)
            .map(|neighbor| self.membership_proof(&neighbor))
            .transpose()?;
        Ok(NonExistenceProof {
            key: key.to_vec(),
            left,
            right,
        })
    }

    /// The proofs a deep subtree must ingest before `set(key, value)`.
    pub fn existence_proofs_needed_for_set(
        &self,
        key: &[u8],
        value: &[u8],
    ) -> Result<Vec<ExistenceProof>> {
        if value.is_empty() {
            return Err(Error::EmptyValue(key.to_vec()));
        }
        if self.get(key).is_some() {
            // In-place update: the spine keeps its shape and no sibling is
            // ever consulted.
            return Ok(vec![self.membership_proof(key)?]);
        }
        let mut keys = BTreeSet::new();
        keys.extend(self.predecessor(key));
        keys.extend(self.successor(key));
        self.collect_sibling_witnesses(key, &mut keys);
        keys.iter().map(|k| self.membership_proof(k)).collect()
    }

    /// The proofs a deep subtree must ingest before `remove(key)`.
    pub fn existence_proofs_needed_for_remove(&self, key: &[u8]) -> Result<Vec<ExistenceProof>> {
        if self.get(key).is_none() {
            return Err(Error::KeyNotFound(key.to_vec()));
        }
        let mut keys = BTreeSet::new();
        keys.insert(key.to_vec());
        keys.extend(self.predecessor(key));
        keys.extend(self.successor(key));
        self.collect_sibling_witnesses(key, &mut keys);
        keys.iter().map(|k| self.membership_proof(k)).collect()
    }

    /// For every node on the descent path of `key`, records the keys whose
    /// membership proofs materialize the off-path sibling's root and the
    /// grandchildren a double rotation can touch. The heights and sizes of
    /// exactly these nodes are what the mutation engine may consult while
    /// recomputing and rebalancing the path.
    fn collect_sibling_witnesses(&self, key: &[u8], keys: &mut BTreeSet<Vec<u8>>) {
        let mut node = match self.root() {
            Some(node) => node,
            None => return,
        };
        while let NodeKind::Inner {
            key: routing_key,
            left,
            right,
        } = &node.kind
        {
            let (next, sibling) = if key < routing_key.as_slice() {
                (left, right)
            } else {
                (right, left)
            };
            if let Some(sibling) = sibling.node() {
                keys.extend(sibling.lowest_key());
                keys.extend(sibling.highest_key());
                if let NodeKind::Inner {
                    left: sibling_left,
                    right: sibling_right,
                    ..
                } = &sibling.kind
                {
                    keys.extend(sibling_left.node().and_then(Node::highest_key));
                    keys.extend(sibling_right.node().and_then(Node::lowest_key));
                }
            }
            match next.node() {
                Some(next) => node = next,
                None => return,
            }
        }
    }

    /// Largest present key strictly below `key`.
    pub(crate) fn predecessor(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.root().and_then(|node| predecessor(node, key))
    }

    /// Smallest present key strictly above `key`.
    pub(crate) fn successor(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.root().and_then(|node| successor(node, key))
    }
}

fn predecessor(node: &Node, key: &[u8]) -> Option<Vec<u8>> {
    match &node.kind {
        NodeKind::Leaf { key: leaf_key, .. } => {
            (leaf_key.as_slice() < key).then(|| leaf_key.clone())
        }
        NodeKind::Inner {
            key: routing_key,
            left,
            right,
        } => {
            if key <= routing_key.as_slice() {
                left.node().and_then(|node| predecessor(node, key))
            } else {
                right
                    .node()
                    .and_then(|node| predecessor(node, key))
                    .or_else(|| left.node().and_then(Node::highest_key))
            }
        }
    }
}

fn successor(node: &Node, key: &[u8]) -> Option<Vec<u8>> {
    match &node.kind {
        NodeKind::Leaf { key: leaf_key, .. } => {
            (leaf_key.as_slice() > key).then(|| leaf_key.clone())
        }
        NodeKind::Inner {
            key: routing_key,
            left,
            right,
        } => {
            if key < routing_key.as_slice() {
                left.node()
                    .and_then(|node| successor(node, key))
                    .or_else(|| right.node().and_then(Node::lowest_key))
            } else {
                right.node().and_then(|node| successor(node, key))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use sha2::Sha256;

    use super::*;
    use crate::testing;

    fn tree_of(pairs: &[(Vec<u8>, Vec<u8>)]) -> Tree<Sha256> {
        let mut tree = Tree::new();
        for (key, value) in pairs {
            tree.set(key, value).unwrap();
        }
        tree
    }

    #[test_strategy::proptest(fork = false)]
    fn test_membership_proof_reconstructs_the_root(
        #[strategy(testing::key_value_pairs(1..12))] pairs: Vec<(Vec<u8>, Vec<u8>)>,
    ) {
        let tree = tree_of(&pairs);
        for (key, value) in &pairs {
            let proof = tree.membership_proof(key).unwrap();
            prop_assert_eq!(&proof.key, key);
            prop_assert_eq!(&proof.value, value);
            let (_, root) = proof.parse_nodes::<Sha256>().unwrap();
            prop_assert_eq!(root, tree.working_hash());
        }
    }

    #[test_strategy::proptest(fork = false)]
    fn test_tampered_proof_changes_the_root(
        #[strategy(testing::key_value_pairs(1..8))] pairs: Vec<(Vec<u8>, Vec<u8>)>,
    ) {
        let tree = tree_of(&pairs);
        let (key, _) = &pairs[0];
        let mut proof = tree.membership_proof(key).unwrap();
        proof.value = b"forged".to_vec();
        match proof.parse_nodes::<Sha256>() {
            Ok((_, root)) => prop_assert_ne!(root, tree.working_hash()),
            Err(Error::MalformedProof(_)) => {}
            Err(error) => prop_assert!(false, "unexpected error: {error}"),
        }
    }

    #[test_strategy::proptest(fork = false)]
    fn test_neighbors_match_a_model_map(
        #[strategy(testing::key_value_pairs(1..12))] pairs: Vec<(Vec<u8>, Vec<u8>)>,
        #[strategy(testing::keys())] probe: Vec<u8>,
    ) {
        let tree = tree_of(&pairs);
        let model: BTreeMap<Vec<u8>, Vec<u8>> = pairs.into_iter().collect();

        let expected_pred = model.range(..probe.clone()).next_back().map(|(k, _)| k.clone());
        let expected_succ = model
            .range((
                std::ops::Bound::Excluded(probe.clone()),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .map(|(k, _)| k.clone());

        prop_assert_eq!(tree.predecessor(&probe), expected_pred);
        prop_assert_eq!(tree.successor(&probe), expected_succ);
    }

    #[test_strategy::proptest(fork = false)]
    fn test_non_membership_proof_brackets_the_key(
        #[strategy(testing::key_value_pairs(1..12))] pairs: Vec<(Vec<u8>, Vec<u8>)>,
        #[strategy(testing::keys())] probe: Vec<u8>,
    ) {
        let tree = tree_of(&pairs);
        prop_assume!(tree.get(&probe).is_none());

        let proof = tree.non_membership_proof(&probe).unwrap();
        prop_assert_eq!(&proof.key, &probe);
        if let Some(left) = &proof.left {
            prop_assert!(left.key < probe);
            let (_, root) = left.parse_nodes::<Sha256>().unwrap();
            prop_assert_eq!(root, tree.working_hash());
        }
        if let Some(right) = &proof.right {
            prop_assert!(right.key > probe);
            let (_, root) = right.parse_nodes::<Sha256>().unwrap();
            prop_assert_eq!(root, tree.working_hash());
        }
        prop_assert!(proof.left.is_some() || proof.right.is_some());
    }

    #[test]
    fn test_update_needs_only_the_membership_proof() {
        let tree = tree_of(&[
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]);
        let proofs = tree.existence_proofs_needed_for_set(b"b", b"9").unwrap();
        assert_eq!(proofs.len(), 1);
        assert_eq!(proofs[0].key, b"b".to_vec());
    }

    #[test]
    fn test_non_membership_proof_of_present_key_is_refused() {
        let tree = tree_of(&[(b"a".to_vec(), b"1".to_vec())]);
        assert_eq!(
            tree.non_membership_proof(b"a"),
            Err(Error::ElementExists)
        );
    }

    #[test_strategy::proptest(fork = false)]
    fn test_planned_proofs_anchor_at_the_root(
        #[strategy(testing::key_value_pairs(1..12))] pairs: Vec<(Vec<u8>, Vec<u8>)>,
        #[strategy(testing::keys())] key: Vec<u8>,
    ) {
        let tree = tree_of(&pairs);
        let proofs = if tree.get(&key).is_some() {
            tree.existence_proofs_needed_for_remove(&key).unwrap()
        } else {
            tree.existence_proofs_needed_for_set(&key, b"v").unwrap()
        };
        for proof in proofs {
            let (_, root) = proof.parse_nodes::<Sha256>().unwrap();
            prop_assert_eq!(root, tree.working_hash());
        }
    }
}

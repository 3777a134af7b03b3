//! The fully materialized tree.
//!
//! This is the oracle side of the protocol: it holds every node, generates
//! the proofs a deep subtree hydrates from, and runs the planner that
//! decides which proofs a prospective mutation needs. It drives the same
//! mutation engine as the deep subtree; with every child witnessed, the
//! engine's partial-tree accommodations never fire.

pub(crate) mod algo;
mod planner;

use std::marker::PhantomData;

use digest::Digest;

use crate::prelude::*;
use algo::{recursive_remove, recursive_set};

pub struct Tree<D: Digest> {
    root: Option<Node>,
    version: i64,
    _phantom: PhantomData<D>,
}

impl<D: Digest> Tree<D> {
    pub fn new() -> Self {
        Self {
            root: None,
            version: 0,
            _phantom: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    /// The latest saved version; mutations mint nodes one above it.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Number of keys in the tree.
    pub fn size(&self) -> i64 {
        self.root.as_ref().map_or(0, Node::size)
    }

    /// Inserts or updates a key; returns whether an existing value was
    /// replaced.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        if value.is_empty() {
            return Err(Error::EmptyValue(key.to_vec()));
        }
        let version = self.version + 1;
        match self.root.clone() {
            None => {
                self.root = Some(Node::leaf::<D>(key.to_vec(), value.to_vec(), version));
                Ok(false)
            }
            Some(root) => {
                let outcome = recursive_set::<D>(root, key, value, version)?;
                self.root = Some(outcome.node);
                Ok(outcome.updated)
            }
        }
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &[u8]) -> Result<(Option<Vec<u8>>, bool)> {
        let Some(root) = self.root.clone() else {
            return Ok((None, false));
        };
        let removal = recursive_remove::<D>(root, key, self.version + 1)?;
        self.root = match removal.replacement {
            None => None,
            Some(Child::Witnessed(node)) => Some(*node),
            Some(Child::Unwitnessed(hash)) => return Err(Error::UnwitnessedSubtree(hash)),
        };
        Ok((Some(removal.value), true))
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let mut node = self.root.as_ref()?;
        loop {
            match &node.kind {
                NodeKind::Leaf {
                    key: leaf_key,
                    value,
                } => {
                    return (leaf_key.as_slice() == key).then_some(value.as_slice());
                }
                NodeKind::Inner {
                    key: routing_key,
                    left,
                    right,
                } => {
                    node = if key < routing_key.as_slice() {
                        left.node()?
                    } else {
                        right.node()?
                    };
                }
            }
        }
    }

    /// Root hash of the working tree; the digest of nothing when empty.
    pub fn working_hash(&self) -> Hash {
        self.root
            .as_ref()
            .map_or_else(|| Hash::digest::<D>(&[]), Node::hash)
    }

    /// Advances the version counter, fixing the working tree as the latest
    /// saved version.
    pub fn save_version(&mut self) -> (Hash, i64) {
        self.version += 1;
        (self.working_hash(), self.version)
    }
}

impl<D: Digest> Default for Tree<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Digest> Clone for Tree<D> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            version: self.version,
            _phantom: PhantomData,
        }
    }
}

impl<D: Digest> std::fmt::Debug for Tree<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("root", &self.root)
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use sha2::Sha256;

    use super::*;
    use crate::testing;

    #[test]
    fn test_empty_tree_hash_is_digest_of_nothing() {
        let tree = Tree::<Sha256>::new();
        assert_eq!(tree.working_hash(), Hash::digest::<Sha256>(&[]));
        assert_eq!(tree.size(), 0);
    }

    #[test]
    fn test_set_rejects_empty_values() {
        let mut tree = Tree::<Sha256>::new();
        assert_eq!(
            tree.set(b"a", b""),
            Err(Error::EmptyValue(b"a".to_vec()))
        );
    }

    #[test]
    fn test_remove_missing_key_fails() {
        let mut tree = Tree::<Sha256>::new();
        assert_eq!(tree.remove(b"a"), Ok((None, false)));

        tree.set(b"a", b"1").unwrap();
        assert_eq!(tree.remove(b"b"), Err(Error::KeyNotFound(b"b".to_vec())));
    }

    #[test]
    fn test_version_advances_only_on_save() {
        let mut tree = Tree::<Sha256>::new();
        tree.set(b"a", b"1").unwrap();
        tree.set(b"b", b"2").unwrap();
        assert_eq!(tree.version(), 0);
        assert_eq!(tree.root().unwrap().version(), 1);

        let (_, version) = tree.save_version();
        assert_eq!(version, 1);

        tree.set(b"c", b"3").unwrap();
        assert_eq!(tree.root().unwrap().version(), 2);
    }

    #[test_strategy::proptest(fork = false)]
    fn test_tracks_a_model_map(#[strategy(testing::operations(1..32))] ops: Vec<testing::Op>) {
        let mut tree = Tree::<Sha256>::new();
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for op in ops {
            match op {
                testing::Op::Set(key, value) => {
                    let updated = tree.set(&key, &value).unwrap();
                    prop_assert_eq!(updated, model.insert(key, value).is_some());
                }
                testing::Op::Remove(key) => {
                    if model.remove(&key).is_some() {
                        let (value, removed) = tree.remove(&key).unwrap();
                        prop_assert!(removed);
                        prop_assert!(value.is_some());
                    } else if !tree.is_empty() {
                        prop_assert!(tree.remove(&key).is_err());
                    }
                }
            }

            prop_assert_eq!(tree.size() as usize, model.len());
            for (key, value) in &model {
                prop_assert_eq!(tree.get(key), Some(value.as_slice()));
            }
            if let Some(root) = tree.root() {
                testing::assert_invariants::<Sha256>(root);
            }
        }
    }

    #[test_strategy::proptest(fork = false)]
    fn test_root_hash_changes_on_insert(
        #[strategy(testing::keys())] key: Vec<u8>,
        #[strategy(testing::values())] value: Vec<u8>,
    ) {
        let mut tree = Tree::<Sha256>::new();
        crate::prop_assert_changes!(
            tree.set(&key, &value).unwrap(),
            tree.working_hash()
        );
    }

    #[test]
    fn test_balanced_insert_round_trip_restores_the_root() {
        // Within one unsaved working version, inserting and removing a key
        // restores the exact root hash, provided the insert did not rotate:
        // the spine is re-minted at the same version both times and the
        // collapse puts the original children back. (A rotated insert is
        // not undone by removal; both shapes are valid AVL trees.)
        let mut tree = Tree::<Sha256>::new();
        for (key, value) in [(&b"a"[..], &b"1"[..]), (b"b", b"2"), (b"c", b"3"), (b"d", b"4")] {
            tree.set(key, value).unwrap();
        }
        let before = tree.working_hash();

        tree.set(b"e", b"5").unwrap();
        assert_ne!(tree.working_hash(), before);

        let (value, removed) = tree.remove(b"e").unwrap();
        assert_eq!(value, Some(b"5".to_vec()));
        assert!(removed);
        assert_eq!(tree.working_hash(), before);
    }
}

//! The deep subtree: a partial tree that mutates state against a commitment.
//!
//! A deep subtree holds only the nodes that existence proofs have witnessed,
//! every other subtree being an opaque hash. That is enough to recompute the
//! root commitment after a bounded set of mutations and arrive at exactly
//! the hash the full tree would produce, which lets a verifier without the
//! full state replay state transitions against a known root.
//!
//! The lifecycle is a cycle of three steps:
//!
//! 1. [`add_existence_proofs`] parses proofs into nodes and persists them in
//!    the content-addressed store;
//! 2. [`build_tree`] links the stored nodes into an in-memory tree below the
//!    root and re-derives the routing keys of inner nodes from the witnessed
//!    leaves;
//! 3. [`set`] and [`remove`] mutate the witnessed portion, recomputing
//!    heights, sizes and hashes along the touched spine exactly as the full
//!    tree does.
//!
//! Which proofs step 1 needs for a given mutation is decided by the planner
//! on the full [`Tree`](crate::tree::Tree).
//!
//! [`add_existence_proofs`]: DeepSubTree::add_existence_proofs
//! [`build_tree`]: DeepSubTree::build_tree
//! [`set`]: DeepSubTree::set
//! [`remove`]: DeepSubTree::remove

use std::marker::PhantomData;

use digest::Digest;

use crate::prelude::*;
use crate::tree::algo::{recursive_remove, recursive_set};

/// A traced store operation, as recorded by an execution trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Delete,
}

/// A traced operation bundled with the proofs a verifier needs to replay it
/// against a known root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessData {
    pub operation: Operation,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub proofs: Vec<ExistenceProof>,
}

pub struct DeepSubTree<D: Digest, S: NodeStore = MemStore> {
    store: S,
    root: Option<Node>,
    version: i64,
    _phantom: PhantomData<D>,
}

impl<D: Digest, S: NodeStore> DeepSubTree<D, S> {
    /// Creates a deep subtree over `store`, minting nodes above `version`.
    /// Pass the full tree's current version to keep the two in lockstep.
    pub fn new(store: S, version: i64) -> Self {
        Self {
            store,
            root: None,
            version,
            _phantom: PhantomData,
        }
    }

    pub fn root(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Parses each proof and persists its nodes in the store. When
    /// `expected_root` is given, every proof must reconstruct exactly that
    /// root. Re-ingesting a proof is a no-op: nodes are content-addressed
    /// and only stored when absent.
    pub fn add_existence_proofs(
        &mut self,
        proofs: &[ExistenceProof],
        expected_root: Option<&Hash>,
    ) -> Result<()> {
        for proof in proofs {
            let (nodes, computed_root) = proof.parse_nodes::<D>()?;
            if let Some(expected) = expected_root {
                if computed_root != *expected {
                    return Err(Error::InconsistentRoot {
                        computed: computed_root,
                        expected: *expected,
                    });
                }
            }
            for node in nodes {
                if !self.store.has(&node.hash())? {
                    self.store.put(node)?;
                }
            }
        }
        self.store.commit()
    }

    /// Links the stored nodes into the in-memory tree.
    ///
    /// With no root established yet, the store must contain `expected_root`
    /// and the tree is materialized below it. With a root already
    /// established, its hash must match `expected_root`, and freshly stored
    /// subtrees are grafted wherever an unwitnessed slot's hash is now
    /// resolvable. Either way the routing keys of every materialized inner
    /// node are then re-derived from the witnessed leaves.
    pub fn build_tree(&mut self, expected_root: &Hash) -> Result<()> {
        match self.root.take() {
            None => {
                let root = self
                    .materialize(expected_root)?
                    .ok_or(Error::RootMissing(*expected_root))?;
                self.root = Some(root);
            }
            Some(mut root) => {
                if root.hash() != *expected_root {
                    let actual = root.hash();
                    self.root = Some(root);
                    return Err(Error::RootMismatch {
                        actual,
                        expected: *expected_root,
                    });
                }
                let grafted = self.graft(&mut root);
                self.root = Some(root);
                grafted?;
            }
        }
        if let Some(root) = &mut self.root {
            repair_routing_keys(root);
        }
        log::debug!("linked deep subtree at root {expected_root}");
        Ok(())
    }

    /// Sets a key in the working tree. The caller must have hydrated the
    /// proofs the planner requires for this mutation at the current root.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        if value.is_empty() {
            return Err(Error::EmptyValue(key.to_vec()));
        }
        let root = self.root.clone().ok_or(Error::EmptyTree)?;
        let outcome = recursive_set::<D>(root, key, value, self.version + 1)?;
        self.root = Some(outcome.node);
        Ok(outcome.updated)
    }

    /// Removes a key from the working tree, returning its value.
    pub fn remove(&mut self, key: &[u8]) -> Result<(Option<Vec<u8>>, bool)> {
        let Some(root) = self.root.clone() else {
            return Ok((None, false));
        };
        let removal = recursive_remove::<D>(root, key, self.version + 1)?;
        let root = match removal.replacement {
            None => None,
            Some(Child::Witnessed(node)) => Some(*node),
            // The surviving child was never materialized; the proofs that
            // witnessed the removed leaf's path left it in the store.
            Some(Child::Unwitnessed(hash)) => {
                let mut node = self
                    .materialize(&hash)?
                    .ok_or(Error::UnwitnessedSubtree(hash))?;
                repair_routing_keys(&mut node);
                Some(node)
            }
        };
        self.root = root;
        Ok((Some(removal.value), true))
    }

    /// Looks a key up among the witnessed leaves. Descending into an
    /// unwitnessed subtree is an error rather than an absence: the key may
    /// well exist there.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(mut node) = self.root.as_ref() else {
            return Ok(None);
        };
        loop {
            match &node.kind {
                NodeKind::Leaf {
                    key: leaf_key,
                    value,
                } => {
                    return Ok((leaf_key.as_slice() == key).then(|| value.clone()));
                }
                NodeKind::Inner {
                    key: routing_key,
                    left,
                    right,
                } => {
                    let child = if key < routing_key.as_slice() {
                        left
                    } else {
                        right
                    };
                    node = child
                        .node()
                        .ok_or_else(|| Error::UnwitnessedSubtree(child.hash()))?;
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

    /// Persists every witnessed node reachable from the root, commits the
    /// store, and advances the version counter.
    pub fn save_version(&mut self) -> Result<(Hash, i64)> {
        if let Some(root) = &self.root {
            persist_reachable(&mut self.store, root)?;
        }
        self.store.commit()?;
        self.version += 1;
        log::debug!(
            "saved deep subtree version {} at root {}",
            self.version,
            self.working_hash()
        );
        Ok((self.working_hash(), self.version))
    }

    /// Hydrates the witness's proofs against `expected_root` and replays the
    /// traced operation. Reads and deletes return the value they observed.
    pub fn apply_witness(
        &mut self,
        witness: &WitnessData,
        expected_root: &Hash,
    ) -> Result<Option<Vec<u8>>> {
        self.add_existence_proofs(&witness.proofs, Some(expected_root))?;
        self.build_tree(expected_root)?;
        match witness.operation {
            Operation::Read => self.get(&witness.key),
            Operation::Write => {
                self.set(&witness.key, &witness.value)?;
                Ok(None)
            }
            Operation::Delete => {
                let (value, _) = self.remove(&witness.key)?;
                Ok(value)
            }
        }
    }

    /// Fetches `hash` from the store and recursively attaches every child
    /// the store already knows; the rest stay unwitnessed.
    fn materialize(&self, hash: &Hash) -> Result<Option<Node>> {
        let Some(mut node) = self.store.get(hash)? else {
            return Ok(None);
        };
        if let NodeKind::Inner { left, right, .. } = &mut node.kind {
            for slot in [left, right] {
                if let Child::Unwitnessed(child_hash) = slot {
                    let child_hash = *child_hash;
                    if let Some(child) = self.materialize(&child_hash)? {
                        *slot = Child::Witnessed(Box::new(child));
                    }
                }
            }
        }
        Ok(Some(node))
    }

    /// Replaces resolvable unwitnessed slots with subtrees from the store
    /// and recurses into the slots that are already materialized.
    fn graft(&self, node: &mut Node) -> Result<()> {
        if let NodeKind::Inner { left, right, .. } = &mut node.kind {
            for slot in [left, right] {
                match slot {
                    Child::Unwitnessed(child_hash) => {
                        let child_hash = *child_hash;
                        if let Some(child) = self.materialize(&child_hash)? {
                            *slot = Child::Witnessed(Box::new(child));
                        }
                    }
                    Child::Witnessed(child) => self.graft(child)?,
                }
            }
        }
        Ok(())
    }
}

impl<D: Digest, S: NodeStore> std::fmt::Debug for DeepSubTree<D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepSubTree")
            .field("root", &self.root)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Second sweep of the linking pass: re-derive inner routing keys from the
/// witnessed leaves, the right child taking precedence.
fn repair_routing_keys(node: &mut Node) {
    if let NodeKind::Inner { key, left, right } = &mut node.kind {
        if let Child::Witnessed(child) = left {
            repair_routing_keys(child);
        }
        if let Child::Witnessed(child) = right {
            repair_routing_keys(child);
        }
        let repaired = right
            .node()
            .and_then(Node::lowest_key)
            .or_else(|| left.node().and_then(Node::highest_key));
        if let Some(repaired) = repaired {
            *key = repaired;
        }
    }
}

fn persist_reachable<S: NodeStore>(store: &mut S, node: &Node) -> Result<()> {
    if let NodeKind::Inner { left, right, .. } = &node.kind {
        if let Child::Witnessed(child) = left {
            persist_reachable(store, child)?;
        }
        if let Child::Witnessed(child) = right {
            persist_reachable(store, child)?;
        }
    }
    if !store.has(&node.hash())? {
        store.put(node.skeleton())?;
    }
    Ok(())
}

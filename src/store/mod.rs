//! Content-addressed node storage.

use std::collections::BTreeMap;

use crate::prelude::*;

/// Storage interface the deep subtree requires: a content-addressed map from
/// node hash to node, with an explicit durability boundary. Nodes are always
/// persisted as skeletons (children demoted to their hashes), so a store
/// entry never drags a subtree along with it.
pub trait NodeStore {
    fn has(&self, hash: &Hash) -> Result<bool>;
    fn get(&self, hash: &Hash) -> Result<Option<Node>>;
    /// Stores a node keyed by its own hash.
    fn put(&mut self, node: Node) -> Result<()>;
    /// Every node currently visible, committed or pending.
    fn nodes(&self) -> Result<Vec<Node>>;
    /// Makes pending writes durable.
    fn commit(&mut self) -> Result<()>;
}

/// In-memory backend. Writes stage into a pending level and become durable
/// on `commit`, mirroring the crash-consistency contract real backends give:
/// dropping the pending level leaves the last committed snapshot intact.
#[derive(Debug, Default, Clone)]
pub struct MemStore {
    committed: BTreeMap<Hash, Node>,
    pending: BTreeMap<Hash, Node>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards writes staged since the last commit.
    pub fn rollback(&mut self) {
        self.pending.clear();
    }
}

impl NodeStore for MemStore {
    fn has(&self, hash: &Hash) -> Result<bool> {
        Ok(self.pending.contains_key(hash) || self.committed.contains_key(hash))
    }

    fn get(&self, hash: &Hash) -> Result<Option<Node>> {
        Ok(self
            .pending
            .get(hash)
            .or_else(|| self.committed.get(hash))
            .cloned())
    }

    fn put(&mut self, node: Node) -> Result<()> {
        let node = node.skeleton();
        self.pending.insert(node.hash(), node);
        Ok(())
    }

    fn nodes(&self) -> Result<Vec<Node>> {
        let mut merged = self.committed.clone();
        merged.extend(self.pending.clone());
        Ok(merged.into_values().collect())
    }

    fn commit(&mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.pending);
        log::debug!("committing {} node(s)", staged.len());
        self.committed.extend(staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sha2::Sha256;

    use super::*;

    fn leaf(key: &[u8]) -> Node {
        Node::leaf::<Sha256>(key.to_vec(), b"v".to_vec(), 1)
    }

    #[test]
    fn test_put_keys_by_node_hash() {
        let mut store = MemStore::new();
        let node = leaf(b"a");
        store.put(node.clone()).unwrap();

        assert!(store.has(&node.hash()).unwrap());
        assert_eq!(store.get(&node.hash()).unwrap(), Some(node));
        assert!(!store.has(&Hash::zero()).unwrap());
    }

    #[test]
    fn test_rollback_drops_uncommitted_writes() {
        let mut store = MemStore::new();
        let durable = leaf(b"a");
        store.put(durable.clone()).unwrap();
        store.commit().unwrap();

        let staged = leaf(b"b");
        store.put(staged.clone()).unwrap();
        store.rollback();

        assert!(store.has(&durable.hash()).unwrap());
        assert!(!store.has(&staged.hash()).unwrap());
    }

    #[test]
    fn test_nodes_merges_both_levels() {
        let mut store = MemStore::new();
        store.put(leaf(b"a")).unwrap();
        store.commit().unwrap();
        store.put(leaf(b"b")).unwrap();

        let mut keys: Vec<_> = store
            .nodes()
            .unwrap()
            .into_iter()
            .filter_map(|node| node.lowest_key())
            .collect();
        keys.sort();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}

//! Recursive mutation engine shared by the full tree and the deep subtree.
//!
//! Every function here tolerates unwitnessed children: descent prefers the
//! witnessed side when only one is available, updates inherit the spine's
//! height and size instead of recomputing them, and any step that would need
//! metadata the proofs never delivered fails with `UnwitnessedSubtree`. A
//! fully materialized tree is the degenerate case in which none of those
//! accommodations ever fire.

use std::cmp::Ordering;

use digest::Digest;

use crate::prelude::*;

pub(crate) struct SetOutcome {
    pub(crate) node: Node,
    pub(crate) updated: bool,
}

/// Inserts or updates `key`, returning the replacement subtree. New nodes
/// are minted at `version`.
pub(crate) fn recursive_set<D: Digest>(
    node: Node,
    key: &[u8],
    value: &[u8],
    version: i64,
) -> Result<SetOutcome> {
    if node.is_leaf() {
        let NodeKind::Leaf { key: leaf_key, .. } = &node.kind else {
            unreachable!("is_leaf checked above");
        };
        let cmp = key.cmp(leaf_key.as_slice());
        let routing_key = leaf_key.clone();
        let node = match cmp {
            // The new leaf becomes the left child; the old leaf is the
            // smallest key of the right subtree and so the routing key.
            Ordering::Less => Node::inner::<D>(
                routing_key,
                Child::Witnessed(Box::new(Node::leaf::<D>(
                    key.to_vec(),
                    value.to_vec(),
                    version,
                ))),
                Child::Witnessed(Box::new(node)),
                version,
            )?,
            Ordering::Greater => Node::inner::<D>(
                key.to_vec(),
                Child::Witnessed(Box::new(node)),
                Child::Witnessed(Box::new(Node::leaf::<D>(
                    key.to_vec(),
                    value.to_vec(),
                    version,
                ))),
                version,
            )?,
            Ordering::Equal => {
                let node = Node::leaf::<D>(key.to_vec(), value.to_vec(), version);
                return Ok(SetOutcome {
                    node,
                    updated: true,
                });
            }
        };
        return Ok(SetOutcome {
            node,
            updated: false,
        });
    }

    let Node {
        height,
        size,
        hash,
        kind,
        ..
    } = node;
    let NodeKind::Inner {
        key: routing_key,
        left,
        right,
    } = kind
    else {
        unreachable!("leaves are handled above");
    };

    if !left.is_witnessed() && !right.is_witnessed() {
        return Err(Error::UnwitnessedSubtree(hash));
    }

    let cmp = key.cmp(routing_key.as_slice());
    let descend_left = left.is_witnessed() && (cmp == Ordering::Less || !right.is_witnessed());
    let descend_right =
        !descend_left && right.is_witnessed() && (cmp != Ordering::Less || !left.is_witnessed());
    if !descend_left && !descend_right {
        return Err(Error::RoutingAmbiguous(key.to_vec()));
    }

    let (left, right, updated) = if descend_left {
        let child = match left {
            Child::Witnessed(node) => *node,
            Child::Unwitnessed(hash) => return Err(Error::UnwitnessedSubtree(hash)),
        };
        let outcome = recursive_set::<D>(child, key, value, version)?;
        (
            Child::Witnessed(Box::new(outcome.node)),
            right,
            outcome.updated,
        )
    } else {
        let child = match right {
            Child::Witnessed(node) => *node,
            Child::Unwitnessed(hash) => return Err(Error::UnwitnessedSubtree(hash)),
        };
        let outcome = recursive_set::<D>(child, key, value, version)?;
        (
            left,
            Child::Witnessed(Box::new(outcome.node)),
            outcome.updated,
        )
    };

    let node = if updated {
        // A value update replaces a leaf in place: the shape of the spine is
        // untouched, so its height and size carry over unexamined. This is
        // what lets a bare membership proof hydrate an update.
        Node::inner_with_meta::<D>(routing_key, left, right, height, size, version)
    } else {
        let node = Node::inner::<D>(routing_key, left, right, version)?;
        balance::<D>(node, version)?
    };
    Ok(SetOutcome { node, updated })
}

pub(crate) struct Removal {
    /// The subtree that replaces the visited node; `None` when the visited
    /// node was the removed leaf itself.
    pub(crate) replacement: Option<Child>,
    /// Routing key handed upward when a removal on the left made an inner
    /// node collapse: the first ancestor that descended right installs it.
    pub(crate) carried_key: Option<Vec<u8>>,
    pub(crate) value: Vec<u8>,
}

/// Removes `key`, returning the replacement subtree and the removed value.
pub(crate) fn recursive_remove<D: Digest>(node: Node, key: &[u8], version: i64) -> Result<Removal> {
    if node.is_leaf() {
        let NodeKind::Leaf {
            key: leaf_key,
            value,
        } = node.kind
        else {
            unreachable!("is_leaf checked above");
        };
        return if leaf_key.as_slice() == key {
            Ok(Removal {
                replacement: None,
                carried_key: None,
                value,
            })
        } else {
            Err(Error::KeyNotFound(key.to_vec()))
        };
    }

    let Node { hash, kind, .. } = node;
    let NodeKind::Inner {
        key: routing_key,
        left,
        right,
    } = kind
    else {
        unreachable!("leaves are handled above");
    };

    if !left.is_witnessed() && !right.is_witnessed() {
        return Err(Error::UnwitnessedSubtree(hash));
    }

    let cmp = key.cmp(routing_key.as_slice());
    let descend_left = left.is_witnessed() && (cmp == Ordering::Less || !right.is_witnessed());
    let descend_right =
        !descend_left && right.is_witnessed() && (cmp != Ordering::Less || !left.is_witnessed());

    if descend_left {
        let child = match left {
            Child::Witnessed(node) => *node,
            Child::Unwitnessed(hash) => return Err(Error::UnwitnessedSubtree(hash)),
        };
        let removal = recursive_remove::<D>(child, key, version)?;
        match removal.replacement {
            // The left child held the key: collapse to the right child
            // verbatim, handing the routing key to the ancestors.
            None => Ok(Removal {
                replacement: Some(right),
                carried_key: Some(routing_key),
                value: removal.value,
            }),
            Some(new_left) => {
                let node = Node::inner::<D>(routing_key, new_left, right, version)?;
                let node = balance::<D>(node, version)?;
                Ok(Removal {
                    replacement: Some(Child::Witnessed(Box::new(node))),
                    carried_key: removal.carried_key,
                    value: removal.value,
                })
            }
        }
    } else if descend_right {
        let child = match right {
            Child::Witnessed(node) => *node,
            Child::Unwitnessed(hash) => return Err(Error::UnwitnessedSubtree(hash)),
        };
        let removal = recursive_remove::<D>(child, key, version)?;
        match removal.replacement {
            None => Ok(Removal {
                replacement: Some(left),
                carried_key: None,
                value: removal.value,
            }),
            Some(new_right) => {
                // A removal in the right subtree may have changed its
                // smallest key, which is exactly this node's routing key.
                let routing_key = removal.carried_key.unwrap_or(routing_key);
                let node = Node::inner::<D>(routing_key, left, new_right, version)?;
                let node = balance::<D>(node, version)?;
                Ok(Removal {
                    replacement: Some(Child::Witnessed(Box::new(node))),
                    carried_key: None,
                    value: removal.value,
                })
            }
        }
    } else {
        Err(Error::KeyNotFound(key.to_vec()))
    }
}

fn balance_factor(node: &Node) -> Result<i16> {
    match &node.kind {
        NodeKind::Leaf { .. } => Ok(0),
        NodeKind::Inner { left, right, .. } => {
            Ok(i16::from(left.height()?) - i16::from(right.height()?))
        }
    }
}

/// Restores the AVL balance of `node` after one child changed height.
pub(crate) fn balance<D: Digest>(node: Node, version: i64) -> Result<Node> {
    let factor = balance_factor(&node)?;

    if factor > 1 {
        let left_factor = match &node.kind {
            NodeKind::Inner {
                left: Child::Witnessed(left),
                ..
            } => balance_factor(left)?,
            NodeKind::Inner {
                left: Child::Unwitnessed(hash),
                ..
            } => return Err(Error::UnwitnessedSubtree(*hash)),
            NodeKind::Leaf { .. } => return Ok(node),
        };
        if left_factor >= 0 {
            return rotate_right::<D>(node, version);
        }
        // Left-right case: rotate the left child first.
        let Node { kind, .. } = node;
        let NodeKind::Inner { key, left, right } = kind else {
            unreachable!("balance factor above 1 implies an inner node");
        };
        let pivot = match left {
            Child::Witnessed(node) => *node,
            Child::Unwitnessed(hash) => return Err(Error::UnwitnessedSubtree(hash)),
        };
        let rotated = rotate_left::<D>(pivot, version)?;
        let node = Node::inner::<D>(key, Child::Witnessed(Box::new(rotated)), right, version)?;
        return rotate_right::<D>(node, version);
    }

    if factor < -1 {
        let right_factor = match &node.kind {
            NodeKind::Inner {
                right: Child::Witnessed(right),
                ..
            } => balance_factor(right)?,
            NodeKind::Inner {
                right: Child::Unwitnessed(hash),
                ..
            } => return Err(Error::UnwitnessedSubtree(*hash)),
            NodeKind::Leaf { .. } => return Ok(node),
        };
        if right_factor <= 0 {
            return rotate_left::<D>(node, version);
        }
        // Right-left case: rotate the right child first.
        let Node { kind, .. } = node;
        let NodeKind::Inner { key, left, right } = kind else {
            unreachable!("balance factor below -1 implies an inner node");
        };
        let pivot = match right {
            Child::Witnessed(node) => *node,
            Child::Unwitnessed(hash) => return Err(Error::UnwitnessedSubtree(hash)),
        };
        let rotated = rotate_right::<D>(pivot, version)?;
        let node = Node::inner::<D>(key, left, Child::Witnessed(Box::new(rotated)), version)?;
        return rotate_left::<D>(node, version);
    }

    Ok(node)
}

/// Rotates `node` left about its right child. Routing keys travel with
/// their nodes; the hash never covers them, so rotations are hash-neutral
/// apart from the rebuilt spine.
fn rotate_left<D: Digest>(node: Node, version: i64) -> Result<Node> {
    let Node { hash, kind, .. } = node;
    let NodeKind::Inner { key, left, right } = kind else {
        return Err(Error::UnwitnessedSubtree(hash));
    };
    let pivot = match right {
        Child::Witnessed(node) => *node,
        Child::Unwitnessed(hash) => return Err(Error::UnwitnessedSubtree(hash)),
    };
    let pivot_hash = pivot.hash();
    let NodeKind::Inner {
        key: pivot_key,
        left: pivot_left,
        right: pivot_right,
    } = pivot.kind
    else {
        return Err(Error::UnwitnessedSubtree(pivot_hash));
    };
    let demoted = Node::inner::<D>(key, left, pivot_left, version)?;
    Node::inner::<D>(
        pivot_key,
        Child::Witnessed(Box::new(demoted)),
        pivot_right,
        version,
    )
}

/// Rotates `node` right about its left child.
fn rotate_right<D: Digest>(node: Node, version: i64) -> Result<Node> {
    let Node { hash, kind, .. } = node;
    let NodeKind::Inner { key, left, right } = kind else {
        return Err(Error::UnwitnessedSubtree(hash));
    };
    let pivot = match left {
        Child::Witnessed(node) => *node,
        Child::Unwitnessed(hash) => return Err(Error::UnwitnessedSubtree(hash)),
    };
    let pivot_hash = pivot.hash();
    let NodeKind::Inner {
        key: pivot_key,
        left: pivot_left,
        right: pivot_right,
    } = pivot.kind
    else {
        return Err(Error::UnwitnessedSubtree(pivot_hash));
    };
    let demoted = Node::inner::<D>(key, pivot_right, right, version)?;
    Node::inner::<D>(
        pivot_key,
        pivot_left,
        Child::Witnessed(Box::new(demoted)),
        version,
    )
}

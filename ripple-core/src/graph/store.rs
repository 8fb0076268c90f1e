//! Node Store
//!
//! The store owns every node of one runtime and maintains the bidirectional
//! producer/consumer edges between them.
//!
//! # Propagation
//!
//! A write pushes dirtiness eagerly through the whole reachable consumer
//! graph, depth-first in subscription order:
//!
//! 1. Each consumer that is not yet dirty is marked dirty and its own
//!    consumers are processed.
//! 2. A consumer that is already dirty stops the walk along that branch:
//!    everything downstream of it was marked by an earlier write and has not
//!    been recomputed since.
//!
//! The cost is therefore bounded by the newly dirtied frontier. Recomputation
//! itself is pull-based and happens on the next read.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::node::{Edge, Node, NodeId, NodeKind, Payload};
use crate::error::{Error, Result};
use crate::view::UnitId;

/// Nodes reached by one propagation.
#[derive(Debug, Default)]
pub struct Propagation {
    /// Newly dirtied nodes, in visit order.
    pub dirtied: Vec<NodeId>,
    /// Effects with a runnable body that must be queued.
    pub effects: Vec<NodeId>,
    /// Units owning any newly dirtied node, deduplicated.
    pub owners: SmallVec<[UnitId; 4]>,
}

impl Propagation {
    pub fn is_empty(&self) -> bool {
        self.dirtied.is_empty()
    }
}

/// What is left of a node after [`NodeStore::destroy`].
pub struct Destroyed {
    /// Units that owned the node.
    pub owners: SmallVec<[UnitId; 1]>,
    /// Value and closures; drop once no store borrow is held.
    pub payload: Payload,
}

/// Storage for all nodes of a runtime, indexed by ID.
///
/// Destroyed nodes stay in the map as tombstones so that late reads through a
/// stale handle fail with [`Error::DestroyedNodeAccess`] instead of looking
/// like an unknown handle.
#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: HashMap<NodeId, Node>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the store.
    pub fn insert(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Look up a node that must exist and must not be destroyed.
    pub fn live(&self, id: NodeId) -> Result<&Node> {
        match self.nodes.get(&id) {
            None => Err(Error::UnknownNode(id)),
            Some(node) if node.is_destroyed() => Err(Error::destroyed(id)),
            Some(node) => Ok(node),
        }
    }

    pub fn live_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        match self.nodes.get_mut(&id) {
            None => Err(Error::UnknownNode(id)),
            Some(node) if node.is_destroyed() => Err(Error::destroyed(id)),
            Some(node) => Ok(node),
        }
    }

    /// Record that `consumer` read `producer` at the producer's current
    /// version. Ignored if either side is gone or destroyed.
    pub fn link(&mut self, consumer: NodeId, producer: NodeId) {
        debug_assert_ne!(consumer, producer, "a node cannot consume itself");
        let version = match self.nodes.get(&producer) {
            Some(node) if !node.is_destroyed() => node.version(),
            _ => return,
        };
        match self.nodes.get_mut(&consumer) {
            Some(node) if !node.is_destroyed() => node.add_producer(producer, version),
            _ => return,
        }
        if let Some(node) = self.nodes.get_mut(&producer) {
            node.add_consumer(consumer);
        }
    }

    /// Remove every producer edge of `consumer`, returning the edges it had.
    pub fn unlink_producers(&mut self, consumer: NodeId) -> SmallVec<[Edge; 4]> {
        let edges = match self.nodes.get_mut(&consumer) {
            Some(node) => node.take_producers(),
            None => return SmallVec::new(),
        };
        for edge in &edges {
            if let Some(producer) = self.nodes.get_mut(&edge.node) {
                producer.remove_consumer(consumer);
            }
        }
        edges
    }

    /// Destroy a node: unlink both directions and take its payload.
    pub fn destroy(&mut self, id: NodeId) -> Result<Destroyed> {
        self.live(id)?;
        self.unlink_producers(id);

        let (payload, consumers, owners) = match self.nodes.get_mut(&id) {
            Some(node) => (
                node.tombstone(),
                node.take_consumers(),
                node.owners().iter().copied().collect(),
            ),
            None => return Err(Error::UnknownNode(id)),
        };
        for consumer in consumers {
            if let Some(node) = self.nodes.get_mut(&consumer) {
                node.remove_producer(id);
            }
        }

        Ok(Destroyed { owners, payload })
    }

    /// Mark everything downstream of `source` dirty.
    ///
    /// Non-revisiting: consumers that are already dirty are not descended.
    pub fn propagate(&mut self, source: NodeId) -> Propagation {
        let mut outcome = Propagation::default();

        let mut stack: Vec<NodeId> = match self.nodes.get(&source) {
            Some(node) => node.consumers().iter().rev().copied().collect(),
            None => return outcome,
        };

        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if node.is_dirty() || node.is_destroyed() {
                continue;
            }
            node.mark_dirty();
            tracing::trace!(node = %id, kind = ?node.kind(), "marked dirty");

            outcome.dirtied.push(id);
            if node.kind() == NodeKind::Effect && node.effect.is_some() {
                outcome.effects.push(id);
            }
            for owner in node.owners() {
                if !outcome.owners.contains(owner) {
                    outcome.owners.push(*owner);
                }
            }
            stack.extend(node.consumers().iter().rev().copied());
        }

        outcome
    }

    /// Get the total number of nodes, tombstones included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes that have not been destroyed.
    pub fn live_count(&self) -> usize {
        self.nodes.values().filter(|node| !node.is_destroyed()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(store: &mut NodeStore, id: NodeId) {
        store.get_mut(id).unwrap().mark_clean();
    }

    #[test]
    fn insert_and_destroy_nodes() {
        let mut store = NodeStore::new();
        let id1 = store.insert(Node::source());
        let id2 = store.insert(Node::derived());
        assert_eq!(store.live_count(), 2);

        store.destroy(id1).unwrap();
        assert_eq!(store.live_count(), 1);
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.live(id1).unwrap_err(), Error::destroyed(id1));
        assert!(store.live(id2).is_ok());
    }

    #[test]
    fn unknown_ids_are_reported() {
        let store = NodeStore::new();
        let id = NodeId::new();
        assert_eq!(store.live(id).unwrap_err(), Error::UnknownNode(id));
    }

    #[test]
    fn link_and_unlink_edges() {
        let mut store = NodeStore::new();
        let source = store.insert(Node::source());
        let derived = store.insert(Node::derived());

        store.link(derived, source);
        assert!(store.get(source).unwrap().consumers().contains(&derived));
        assert!(store.get(derived).unwrap().has_producer(source));

        let edges = store.unlink_producers(derived);
        assert_eq!(edges.len(), 1);
        assert!(!store.get(source).unwrap().consumers().contains(&derived));
        assert!(!store.get(derived).unwrap().has_producer(source));
    }

    #[test]
    fn destroy_unlinks_both_directions() {
        let mut store = NodeStore::new();
        let a = store.insert(Node::source());
        let b = store.insert(Node::derived());
        let c = store.insert(Node::derived());
        store.link(b, a);
        store.link(c, b);

        store.destroy(b).unwrap();
        assert!(store.get(a).unwrap().consumers().is_empty());
        assert_eq!(store.get(c).unwrap().producer_count(), 0);
    }

    #[test]
    fn propagation_marks_chain() {
        let mut store = NodeStore::new();
        let source = store.insert(Node::source());
        let d1 = store.insert(Node::derived());
        let d2 = store.insert(Node::derived());
        store.link(d1, source);
        store.link(d2, d1);
        clean(&mut store, d1);
        clean(&mut store, d2);

        let outcome = store.propagate(source);
        assert_eq!(outcome.dirtied, vec![d1, d2]);
        assert!(store.get(d1).unwrap().is_dirty());
        assert!(store.get(d2).unwrap().is_dirty());
    }

    #[test]
    fn propagation_stops_at_dirty_frontier() {
        let mut store = NodeStore::new();
        let source = store.insert(Node::source());
        let d1 = store.insert(Node::derived());
        let d2 = store.insert(Node::derived());
        store.link(d1, source);
        store.link(d2, d1);
        clean(&mut store, d2);

        // d1 is still dirty from creation, so d2 is never reached.
        let outcome = store.propagate(source);
        assert!(outcome.is_empty());
        assert!(!store.get(d2).unwrap().is_dirty());
    }

    #[test]
    fn diamond_is_visited_once() {
        let mut store = NodeStore::new();
        let a = store.insert(Node::source());
        let b = store.insert(Node::derived());
        let c = store.insert(Node::derived());
        let d = store.insert(Node::derived());
        store.link(b, a);
        store.link(c, a);
        store.link(d, b);
        store.link(d, c);
        for id in [b, c, d] {
            clean(&mut store, id);
        }

        let outcome = store.propagate(a);
        assert_eq!(outcome.dirtied, vec![b, d, c]);
    }
}

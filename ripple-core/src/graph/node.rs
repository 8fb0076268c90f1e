//! Graph Nodes
//!
//! This module defines the node record that lives in the dependency graph.
//! A node is type-erased: its value sits behind `Rc<dyn Any>` and the typed
//! handles in [`crate::reactive`] downcast on the way out.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::error::Result;
use crate::reactive::Runtime;
use crate::view::UnitId;

/// Unique identifier for a node in the dependency graph.
///
/// Ids come from a process-wide counter, so a handle from one runtime never
/// aliases a node of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node #{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum NodeKind {
    /// A source node. Written from outside, never computed.
    Source,

    /// A derived node. Lazily computed from other nodes and cached.
    Derived,

    /// An effect node. Reads other nodes for their side effect and has no
    /// readers of its own.
    Effect,
}

pub(crate) type Value = Rc<dyn Any>;
pub(crate) type EqualityFn = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;
pub(crate) type ComputeFn = Rc<dyn Fn(&Runtime) -> Result<Value>>;
pub(crate) type EffectFn = Rc<RefCell<dyn FnMut(&Runtime) -> Result<()>>>;

/// A producer edge as seen from the consumer side.
///
/// `version` is the producer's version at the time the consumer read it,
/// which lets a dirty consumer check whether anything it depends on actually
/// changed before recomputing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub node: NodeId,
    pub version: u64,
}

/// Value and closures taken out of a destroyed node.
#[must_use = "drop the payload outside of any store borrow"]
pub struct Payload {
    _value: Option<Value>,
    _compute: Option<ComputeFn>,
    _effect: Option<EffectFn>,
}

/// A node in the dependency graph.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    dirty: bool,
    version: u64,
    /// Set while the node's computation is on the stack.
    computing: bool,
    destroyed: bool,
    /// Whether a computation has ever completed for this node.
    settled: bool,

    pub(crate) value: Option<Value>,
    pub(crate) equals: Option<EqualityFn>,
    pub(crate) compute: Option<ComputeFn>,
    pub(crate) effect: Option<EffectFn>,

    /// Nodes that this node read during its last computation.
    producers: SmallVec<[Edge; 4]>,

    /// Nodes that read this node, in subscription order.
    consumers: IndexSet<NodeId>,

    /// View units this node belongs to.
    owners: SmallVec<[UnitId; 1]>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            dirty: match kind {
                NodeKind::Source => false,
                // Start dirty to ensure first computation
                NodeKind::Derived | NodeKind::Effect => true,
            },
            version: 0,
            computing: false,
            destroyed: false,
            settled: kind == NodeKind::Source,
            value: None,
            equals: None,
            compute: None,
            effect: None,
            producers: SmallVec::new(),
            consumers: IndexSet::new(),
            owners: SmallVec::new(),
        }
    }

    pub fn source() -> Self {
        Self::new(NodeKind::Source)
    }

    pub fn derived() -> Self {
        Self::new(NodeKind::Derived)
    }

    pub fn effect() -> Self {
        Self::new(NodeKind::Effect)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn is_computing(&self) -> bool {
        self.computing
    }

    /// Whether a computation has completed at least once.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn set_computing(&mut self, computing: bool) {
        self.computing = computing;
    }

    pub(crate) fn mark_settled(&mut self) {
        self.settled = true;
    }

    /// Forget the cached result so the next poll recomputes unconditionally.
    pub(crate) fn unsettle(&mut self) {
        self.settled = false;
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Record a read of `producer` at `version`. Repeated reads of the same
    /// producer within one computation keep the first record.
    pub(crate) fn add_producer(&mut self, producer: NodeId, version: u64) {
        if !self.producers.iter().any(|edge| edge.node == producer) {
            self.producers.push(Edge {
                node: producer,
                version,
            });
        }
    }

    pub(crate) fn remove_producer(&mut self, producer: NodeId) {
        self.producers.retain(|edge| edge.node != producer);
    }

    pub(crate) fn producer_edges(&self) -> &[Edge] {
        &self.producers
    }

    pub(crate) fn take_producers(&mut self) -> SmallVec<[Edge; 4]> {
        std::mem::take(&mut self.producers)
    }

    pub fn has_producer(&self, node: NodeId) -> bool {
        self.producers.iter().any(|edge| edge.node == node)
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    pub(crate) fn add_consumer(&mut self, consumer: NodeId) {
        self.consumers.insert(consumer);
    }

    pub(crate) fn remove_consumer(&mut self, consumer: NodeId) {
        self.consumers.shift_remove(&consumer);
    }

    pub fn consumers(&self) -> &IndexSet<NodeId> {
        &self.consumers
    }

    pub(crate) fn take_consumers(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.consumers)
    }

    pub fn owners(&self) -> &[UnitId] {
        &self.owners
    }

    pub(crate) fn add_owner(&mut self, unit: UnitId) {
        if !self.owners.contains(&unit) {
            self.owners.push(unit);
        }
    }

    /// Turn the node into a tombstone and hand back its payload. Edges are
    /// the store's business.
    ///
    /// The payload is returned rather than dropped so that user destructors
    /// captured by the closures run after the store borrow is released.
    pub(crate) fn tombstone(&mut self) -> Payload {
        self.destroyed = true;
        self.dirty = false;
        self.equals = None;
        Payload {
            _value: self.value.take(),
            _compute: self.compute.take(),
            _effect: self.effect.take(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("dirty", &self.dirty)
            .field("version", &self.version)
            .field("destroyed", &self.destroyed)
            .field("producers", &self.producers.len())
            .field("consumers", &self.consumers.len())
            .field("owners", &self.owners)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn source_node_starts_clean() {
        let node = Node::source();
        assert_eq!(node.kind(), NodeKind::Source);
        assert!(!node.is_dirty());
        assert!(node.is_settled());
    }

    #[test]
    fn computed_nodes_start_dirty() {
        assert!(Node::derived().is_dirty());
        assert!(Node::effect().is_dirty());
        assert!(!Node::derived().is_settled());
    }

    #[test]
    fn producer_records_are_deduplicated() {
        let mut node = Node::derived();
        let dep1 = NodeId::new();
        let dep2 = NodeId::new();

        node.add_producer(dep1, 3);
        node.add_producer(dep2, 0);
        node.add_producer(dep1, 4);

        assert_eq!(node.producer_count(), 2);
        assert_eq!(node.producer_edges()[0], Edge { node: dep1, version: 3 });

        node.remove_producer(dep1);
        assert!(!node.has_producer(dep1));
        assert!(node.has_producer(dep2));
    }

    #[test]
    fn consumers_keep_subscription_order() {
        let mut node = Node::source();
        let ids: Vec<_> = (0..4).map(|_| NodeId::new()).collect();
        for id in &ids {
            node.add_consumer(*id);
        }
        node.remove_consumer(ids[1]);

        let order: Vec<_> = node.consumers().iter().copied().collect();
        assert_eq!(order, vec![ids[0], ids[2], ids[3]]);
    }

    #[test]
    fn tombstone_drops_payload() {
        let mut node = Node::source();
        node.value = Some(Rc::new(5_i32));
        let _payload = node.tombstone();
        assert!(node.is_destroyed());
        assert!(node.value.is_none());
    }
}

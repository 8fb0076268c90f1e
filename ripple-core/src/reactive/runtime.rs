//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects sources, derived
//! values, effects and the view tree. It owns the dependency graph and
//! decides what to recompute when a source changes.
//!
//! # How It Works
//!
//! 1. Creating a node inserts it into the runtime's [`NodeStore`].
//!
//! 2. When a derived value or effect reads a node, the runtime records the
//!    edge together with the version of the node it saw.
//!
//! 3. When a source's value changes, the runtime:
//!    a. Marks every consumer reachable from it dirty (once)
//!    b. Queues dirtied effects for the next scheduling pass
//!    c. Marks the view units owning dirtied nodes
//!    d. Leaves derived values alone; they recompute on next read
//!
//! 4. A dirty derived value first polls its producers. If none of them
//!    actually changed version, the cached value is still good and is
//!    returned without running the computation.
//!
//! # Threading
//!
//! A runtime is single-threaded and `!Send`. Only the trigger handle may be
//! shared with other threads.

use std::any::{type_name, Any};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexSet;
use serde::Serialize;
use smallvec::SmallVec;

use super::context::{ContextStack, FrameKind, OwnerScope, ReactiveContext};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::graph::{Edge, EqualityFn, Node, NodeId, NodeKind, NodeStore, Value};
use crate::scheduler::PassState;
use crate::trigger::TriggerHandle;
use crate::view::{UnitId, ViewTree};

/// Anything that names a node of the graph.
pub trait NodeHandle: Copy {
    fn node(&self) -> NodeId;
}

/// A handle whose node holds a value of type `Self::Value`.
pub trait Readable: NodeHandle {
    type Value: Clone + 'static;
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    /// Writes that changed a source and propagated.
    pub propagations: u64,
    /// Derived computations that ran, successful or not.
    pub recomputations: u64,
    /// Effect bodies that ran.
    pub effect_runs: u64,
}

pub(crate) struct Inner {
    pub(crate) graph: RefCell<NodeStore>,
    pub(crate) tree: RefCell<ViewTree>,
    pub(crate) context: RefCell<ContextStack>,
    /// Effects waiting for the next pass, in queue order.
    pub(crate) pending: RefCell<IndexSet<NodeId>>,
    pub(crate) trigger: TriggerHandle,
    pub(crate) quiet: Cell<usize>,
    pub(crate) quiet_dirt: Cell<bool>,
    pub(crate) pass: RefCell<PassState>,
    pub(crate) stats: Cell<GraphStats>,
    pub(crate) config: RuntimeConfig,
}

/// Handle to a reactive runtime.
///
/// Cloning is cheap and yields another handle to the same runtime.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<Inner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("nodes", &self.inner.graph.borrow().live_count())
            .field("units", &self.inner.tree.borrow().len())
            .field("pending_effects", &self.inner.pending.borrow().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                graph: RefCell::new(NodeStore::new()),
                tree: RefCell::new(ViewTree::new()),
                context: RefCell::new(ContextStack::default()),
                pending: RefCell::new(IndexSet::new()),
                trigger: TriggerHandle::new(),
                quiet: Cell::new(0),
                quiet_dirt: Cell::new(false),
                pass: RefCell::new(PassState::default()),
                stats: Cell::new(GraphStats::default()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> GraphStats {
        self.inner.stats.get()
    }

    fn bump(&self, f: impl FnOnce(&mut GraphStats)) {
        let mut stats = self.inner.stats.get();
        f(&mut stats);
        self.inner.stats.set(stats);
    }

    /// Number of nodes that have not been destroyed.
    pub fn node_count(&self) -> usize {
        self.inner.graph.borrow().live_count()
    }

    /// The node reads are currently attributed to, if any.
    pub fn current_consumer(&self) -> Option<NodeId> {
        self.inner.context.borrow().current_consumer()
    }

    /// Check if we're inside a tracking computation.
    pub fn is_tracking(&self) -> bool {
        self.current_consumer().is_some()
    }

    /// Read a node's value, bringing derived nodes up to date first.
    ///
    /// Inside a tracking computation this also subscribes the computation
    /// to the node.
    pub fn read<H: Readable>(&self, handle: H) -> Result<H::Value> {
        let id = handle.node();
        let value = self.read_value(id)?;
        downcast::<H::Value>(id, &value)
    }

    /// Run `f` with tracking suspended.
    pub fn untracked<R>(&self, f: impl FnOnce(&Runtime) -> R) -> R {
        let _frame = ReactiveContext::untracked(&self.inner.context);
        f(self)
    }

    /// Destroy a node of any kind. Later access through any handle to it
    /// fails with [`Error::DestroyedNodeAccess`].
    pub fn destroy<H: NodeHandle>(&self, handle: H) -> Result<()> {
        self.destroy_node(handle.node())
    }

    pub fn version<H: NodeHandle>(&self, handle: H) -> Result<u64> {
        Ok(self.inner.graph.borrow().live(handle.node())?.version())
    }

    pub fn is_dirty<H: NodeHandle>(&self, handle: H) -> Result<bool> {
        Ok(self.inner.graph.borrow().live(handle.node())?.is_dirty())
    }

    /// Make `unit` an additional owner of an existing node. The node is
    /// destroyed with the unit and its dirtying marks the unit.
    pub fn adopt<H: NodeHandle>(&self, handle: H, unit: UnitId) -> Result<()> {
        let id = handle.node();
        self.inner.tree.borrow().live(unit)?;
        self.inner.graph.borrow_mut().live_mut(id)?.add_owner(unit);
        if let Ok(owner) = self.inner.tree.borrow_mut().live_mut(unit) {
            if !owner.owned.contains(&id) {
                owner.owned.push(id);
            }
        }
        Ok(())
    }

    /// Run `f` with `unit` as the owner of every node it creates.
    pub fn with_owner<R>(&self, unit: UnitId, f: impl FnOnce(&Runtime) -> R) -> Result<R> {
        self.inner.tree.borrow().live(unit)?;
        let _scope = OwnerScope::enter(&self.inner.context, unit);
        Ok(f(self))
    }

    // ------------------------------------------------------------------
    // Untyped node operations
    // ------------------------------------------------------------------

    /// Insert a node, attaching it to the current owner scope.
    pub(crate) fn create_node(&self, mut node: Node) -> NodeId {
        let id = node.id();
        let owner = self.inner.context.borrow().current_owner();
        if let Some(owner) = owner {
            if let Ok(unit) = self.inner.tree.borrow_mut().live_mut(owner) {
                unit.owned.push(id);
                node.add_owner(owner);
            }
        }
        self.inner.graph.borrow_mut().insert(node);
        tracing::trace!(node = %id, ?owner, "node created");
        id
    }

    pub(crate) fn read_value(&self, id: NodeId) -> Result<Value> {
        let kind = {
            let graph = self.inner.graph.borrow();
            let node = graph.live(id)?;
            if node.is_computing() {
                return Err(Error::CyclicDependency { node: id });
            }
            node.kind()
        };
        if kind == NodeKind::Derived {
            self.settle_producers(id);
            self.refresh_derived(id)?;
        }

        let consumer = self.inner.context.borrow().current_consumer();
        let mut graph = self.inner.graph.borrow_mut();
        if let Some(consumer) = consumer {
            if consumer != id {
                graph.link(consumer, id);
            }
        }
        graph
            .live(id)?
            .value
            .clone()
            .ok_or(Error::TypeMismatch {
                node: id,
                expected: "a value",
            })
    }

    /// Current value without tracking or refreshing.
    pub(crate) fn peek_value(&self, id: NodeId) -> Result<Value> {
        self.inner
            .graph
            .borrow()
            .live(id)?
            .value
            .clone()
            .ok_or(Error::TypeMismatch {
                node: id,
                expected: "a value",
            })
    }

    pub(crate) fn write_value(&self, id: NodeId, value: Value) -> Result<()> {
        let (previous, equals) = {
            let graph = self.inner.graph.borrow();
            let node = graph.live(id)?;
            (node.value.clone(), node.equals.clone())
        };
        if let Some(consumer) = self.inner.context.borrow().active_derived() {
            return Err(Error::IllegalMutation { node: id, consumer });
        }
        if let (Some(previous), Some(equals)) = (&previous, &equals) {
            if equals(&**previous, &*value) {
                return Ok(());
            }
        }

        let (outcome, replaced) = {
            let mut graph = self.inner.graph.borrow_mut();
            let node = graph.live_mut(id)?;
            let replaced = node.value.replace(value);
            node.bump_version();
            (graph.propagate(id), replaced)
        };
        drop(replaced);
        drop(previous);

        self.bump(|stats| stats.propagations += 1);
        tracing::debug!(
            node = %id,
            dirtied = outcome.dirtied.len(),
            effects = outcome.effects.len(),
            "source written"
        );

        if !outcome.effects.is_empty() {
            self.inner.pending.borrow_mut().extend(outcome.effects.iter().copied());
        }
        for owner in &outcome.owners {
            if self.inner.tree.borrow().is_live(*owner) {
                self.mark_unit_dirty(*owner)?;
            }
        }
        if !outcome.effects.is_empty() || !outcome.owners.is_empty() {
            self.schedule_tick();
        }
        Ok(())
    }

    /// Bring a derived node up to date.
    fn refresh_derived(&self, id: NodeId) -> Result<()> {
        let (dirty, settled) = {
            let graph = self.inner.graph.borrow();
            let node = graph.live(id)?;
            (node.is_dirty(), node.is_settled())
        };
        if !dirty {
            return Ok(());
        }
        if settled && !self.producers_changed(id) {
            if let Some(node) = self.inner.graph.borrow_mut().get_mut(id) {
                node.mark_clean();
            }
            tracing::trace!(node = %id, "producers unchanged, cache kept");
            return Ok(());
        }
        self.recompute(id)
    }

    /// Refresh the dirty derived producers behind `id` deepest first, so
    /// the recursive poll in `refresh_derived` finds them clean and stays
    /// shallow however long the chain is. Only producers that computed
    /// successfully before are visited; failures are left for the caller's
    /// own refresh to report.
    fn settle_producers(&self, id: NodeId) {
        let polls = |node: &Node| {
            node.kind() == NodeKind::Derived
                && node.is_dirty()
                && node.is_settled()
                && !node.is_computing()
                && !node.is_destroyed()
        };

        let mut order: IndexSet<NodeId> = IndexSet::new();
        {
            let graph = self.inner.graph.borrow();
            match graph.get(id) {
                Some(node) if node.is_dirty() && node.is_settled() => {}
                _ => return,
            }
            let mut stack = vec![id];
            while let Some(current) = stack.pop() {
                let Some(node) = graph.get(current) else {
                    continue;
                };
                for edge in node.producer_edges() {
                    let due = graph.get(edge.node).is_some_and(polls);
                    if due && order.insert(edge.node) {
                        stack.push(edge.node);
                    }
                }
            }
        }
        if order.len() > 1 {
            tracing::trace!(node = %id, producers = order.len(), "settling producers");
        }

        for producer in order.into_iter().rev() {
            if let Err(err) = self.refresh_derived(producer) {
                tracing::trace!(node = %producer, error = %err, "producer refresh failed");
            }
        }
    }

    /// Whether any producer moved past the version `id` last saw. Derived
    /// producers are refreshed first, in the order they were read.
    fn producers_changed(&self, id: NodeId) -> bool {
        let edges: SmallVec<[Edge; 4]> = match self.inner.graph.borrow().get(id) {
            Some(node) => node.producer_edges().iter().copied().collect(),
            None => return true,
        };
        for edge in edges {
            let kind = match self.inner.graph.borrow().get(edge.node) {
                Some(node) if !node.is_destroyed() => node.kind(),
                _ => return true,
            };
            if kind == NodeKind::Derived && self.refresh_derived(edge.node).is_err() {
                return true;
            }
            let current = match self.inner.graph.borrow().get(edge.node) {
                Some(node) if !node.is_destroyed() => node.version(),
                _ => return true,
            };
            if current != edge.version {
                return true;
            }
        }
        false
    }

    fn recompute(&self, id: NodeId) -> Result<()> {
        let compute = {
            let mut graph = self.inner.graph.borrow_mut();
            let node = graph.live_mut(id)?;
            if node.is_computing() {
                return Err(Error::CyclicDependency { node: id });
            }
            let Some(compute) = node.compute.clone() else {
                return Err(Error::TypeMismatch {
                    node: id,
                    expected: "a derived computation",
                });
            };
            node.set_computing(true);
            graph.unlink_producers(id);
            compute
        };

        let result = {
            let _frame = ReactiveContext::enter(&self.inner.context, id, FrameKind::Derived);
            compute(self)
        };
        self.bump(|stats| stats.recomputations += 1);

        let (previous, equals) = {
            let mut graph = self.inner.graph.borrow_mut();
            let Some(node) = graph.get_mut(id) else {
                return Err(Error::UnknownNode(id));
            };
            node.set_computing(false);
            if node.is_destroyed() {
                return Err(Error::destroyed(id));
            }
            (node.value.clone(), node.equals.clone())
        };

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                let mut graph = self.inner.graph.borrow_mut();
                graph.unlink_producers(id);
                if let Some(node) = graph.get_mut(id) {
                    node.unsettle();
                }
                tracing::debug!(node = %id, error = %err, "computation failed");
                return Err(err);
            }
        };

        let changed = match (&previous, &equals) {
            (Some(previous), Some(equals)) => !equals(&**previous, &*value),
            _ => true,
        };

        let mut graph = self.inner.graph.borrow_mut();
        let node = graph.live_mut(id)?;
        let stale = if changed {
            node.bump_version();
            node.value.replace(value)
        } else {
            None
        };
        node.mark_clean();
        node.mark_settled();
        drop(graph);
        drop(stale);

        tracing::trace!(node = %id, changed, "recomputed");
        Ok(())
    }

    /// Run a queued effect if it is still dirty. Returns whether its body ran.
    pub(crate) fn run_effect(&self, id: NodeId) -> Result<bool> {
        let (effect, owner, settled) = match self.inner.graph.borrow().get(id) {
            Some(node) if !node.is_destroyed() && node.is_dirty() => (
                node.effect.clone(),
                node.owners().first().copied(),
                node.is_settled(),
            ),
            _ => return Ok(false),
        };
        let Some(effect) = effect else {
            return Ok(false);
        };

        if settled {
            self.settle_producers(id);
        }
        if settled && !self.producers_changed(id) {
            if let Some(node) = self.inner.graph.borrow_mut().get_mut(id) {
                node.mark_clean();
            }
            return Ok(false);
        }

        {
            let mut graph = self.inner.graph.borrow_mut();
            if let Some(node) = graph.get_mut(id) {
                node.mark_clean();
            }
            graph.unlink_producers(id);
        }

        let result = {
            let _scope = owner.map(|owner| OwnerScope::enter(&self.inner.context, owner));
            let _frame = ReactiveContext::enter(&self.inner.context, id, FrameKind::Effect);
            match effect.try_borrow_mut() {
                Ok(mut body) => (&mut *body)(self),
                Err(_) => Err(Error::CyclicDependency { node: id }),
            }
        };
        self.bump(|stats| stats.effect_runs += 1);

        match result {
            Ok(()) => {
                if let Some(node) = self.inner.graph.borrow_mut().get_mut(id) {
                    node.mark_settled();
                }
                tracing::trace!(node = %id, "effect ran");
                Ok(true)
            }
            Err(err) => {
                let live = {
                    let mut graph = self.inner.graph.borrow_mut();
                    graph.unlink_producers(id);
                    match graph.get_mut(id) {
                        Some(node) if !node.is_destroyed() => {
                            node.mark_dirty();
                            node.unsettle();
                            true
                        }
                        _ => false,
                    }
                };
                if live {
                    self.inner.pending.borrow_mut().insert(id);
                }
                tracing::debug!(node = %id, error = %err, "effect failed");
                Err(err)
            }
        }
    }

    /// Run the queued effects whose first owner is `owner` (`None` for
    /// unowned effects). Effects queued while flushing wait for the next
    /// flush.
    pub(crate) fn flush_pending(&self, owner: Option<UnitId>) -> Result<usize> {
        let batch: Vec<NodeId> = {
            let pending = self.inner.pending.borrow();
            if pending.is_empty() {
                return Ok(0);
            }
            let graph = self.inner.graph.borrow();
            pending
                .iter()
                .copied()
                .filter(|id| graph.get(*id).and_then(|node| node.owners().first().copied()) == owner)
                .collect()
        };

        let mut ran = 0;
        for id in batch {
            self.inner.pending.borrow_mut().shift_remove(&id);
            if self.run_effect(id)? {
                ran += 1;
            }
        }
        Ok(ran)
    }

    pub(crate) fn has_unowned_pending(&self) -> bool {
        let pending = self.inner.pending.borrow();
        let graph = self.inner.graph.borrow();
        pending
            .iter()
            .any(|id| graph.get(*id).is_some_and(|node| node.owners().is_empty()))
    }

    pub(crate) fn destroy_node(&self, id: NodeId) -> Result<()> {
        let destroyed = self.inner.graph.borrow_mut().destroy(id)?;
        self.inner.pending.borrow_mut().shift_remove(&id);
        {
            let mut tree = self.inner.tree.borrow_mut();
            for owner in &destroyed.owners {
                if let Some(unit) = tree.get_mut(*owner) {
                    unit.owned.retain(|node| *node != id);
                }
            }
        }
        tracing::trace!(node = %id, "node destroyed");
        drop(destroyed);
        Ok(())
    }
}

/// Wrap a typed equality predicate for storage in a node.
pub(crate) fn erase_equality<T: 'static>(equals: impl Fn(&T, &T) -> bool + 'static) -> EqualityFn {
    Rc::new(move |a: &dyn Any, b: &dyn Any| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => equals(a, b),
            _ => false,
        }
    })
}

pub(crate) fn downcast<T: Clone + 'static>(id: NodeId, value: &Value) -> Result<T> {
    (**value)
        .downcast_ref::<T>()
        .cloned()
        .ok_or(Error::TypeMismatch {
            node: id,
            expected: type_name::<T>(),
        })
}

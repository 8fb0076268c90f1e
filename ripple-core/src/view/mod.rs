//! View Tree
//!
//! A tree of view units, each with a refresh policy, status flags and a set
//! of bindings. Units are the scheduler's unit of work.
//!
//! # Ownership
//!
//! Every unit has a view node: an effect-kind node with no body that its
//! bindings run under. Reads made by bindings subscribe the view node, so a
//! write to anything a binding read dirties the view node, which in turn
//! marks the unit dirty. Nodes created while a unit's bindings or effects run
//! belong to the unit and are destroyed with it.

mod flags;
mod tree;
mod unit;

pub use flags::{RefreshPolicy, UnitFlags};
pub use tree::{PreorderKey, Teardown, UnitSnapshot, ViewTree};
pub use unit::{Binding, UnitId, ViewUnit};

use crate::error::{Error, Result};
use crate::graph::Node;
use crate::reactive::Runtime;

impl Runtime {
    /// Create a unit under `parent` (or a new root). The unit starts dirty
    /// so the first tick refreshes it.
    pub fn create_unit(&self, parent: Option<UnitId>, policy: RefreshPolicy) -> Result<UnitId> {
        if let Some(parent) = parent {
            self.inner.tree.borrow().live(parent)?;
        }

        let id = UnitId::new();
        let mut view_node = Node::effect();
        view_node.mark_clean();
        view_node.add_owner(id);
        let view_node = self.inner.graph.borrow_mut().insert(view_node);

        self.inner
            .tree
            .borrow_mut()
            .insert(ViewUnit::new(id, policy, parent, view_node))?;
        self.mark_unit_dirty(id)?;
        if self.inner.config.notify_on_create {
            self.schedule_tick();
        }
        tracing::trace!(unit = %id, ?parent, ?policy, "unit created");
        Ok(id)
    }

    /// Attach a binding to a unit. The unit is marked dirty so the binding
    /// runs on the next pass.
    pub fn add_binding<B>(&self, unit: UnitId, binding: B) -> Result<()>
    where
        B: Binding + 'static,
    {
        self.inner
            .tree
            .borrow_mut()
            .live_mut(unit)?
            .bindings
            .push(Box::new(binding));
        self.mark_dirty(unit)?;
        Ok(())
    }

    /// Closure form of [`Runtime::add_binding`].
    pub fn bind<F>(&self, unit: UnitId, refresh: F) -> Result<()>
    where
        F: FnMut(&Runtime, UnitId) -> Result<()> + 'static,
    {
        self.add_binding(unit, refresh)
    }

    /// Mark a unit for refresh and request a tick. Returns the root of the
    /// unit's tree.
    ///
    /// During a pass only the Dirty bit is set and the unit is recorded for
    /// targeted replay; ancestors are marked once the pass ends.
    pub fn mark_dirty(&self, unit: UnitId) -> Result<UnitId> {
        let root = self.mark_unit_dirty(unit)?;
        self.schedule_tick();
        Ok(root)
    }

    pub(crate) fn mark_unit_dirty(&self, unit: UnitId) -> Result<UnitId> {
        if self.inner.pass.borrow().active {
            let root = {
                let mut tree = self.inner.tree.borrow_mut();
                tree.mark_local(unit)?;
                tree.root_of(unit)
            };
            self.inner.pass.borrow_mut().record(unit);
            tracing::trace!(unit = %unit, "marked during pass");
            return Ok(root);
        }
        self.inner.tree.borrow_mut().mark_dirty(unit)
    }

    /// Hide a unit and its subtree from traversal, keeping all state.
    pub fn detach(&self, unit: UnitId) -> Result<()> {
        let mut tree = self.inner.tree.borrow_mut();
        tree.set_attached(unit, false)?;
        tree.settle_ancestors(unit);
        Ok(())
    }

    /// Make a detached unit visible again. Dirt it accumulated while
    /// detached is announced to its ancestors.
    pub fn reattach(&self, unit: UnitId) -> Result<()> {
        let flags = self.inner.tree.borrow_mut().set_attached(unit, true)?;
        if !flags.is_pending() {
            return Ok(());
        }
        self.inner.tree.borrow_mut().mark_ancestors(unit);
        if self.inner.pass.borrow().active {
            self.inner.pass.borrow_mut().record(unit);
        }
        self.schedule_tick();
        Ok(())
    }

    /// Destroy a unit and its subtree, along with every node they own.
    pub fn destroy_unit(&self, unit: UnitId) -> Result<()> {
        let (parent, teardown) = {
            let mut tree = self.inner.tree.borrow_mut();
            let parent = tree.live(unit)?.parent();
            (parent, tree.destroy(unit)?)
        };

        self.inner.pass.borrow_mut().forget(&teardown.units);
        for node in &teardown.nodes {
            match self.destroy_node(*node) {
                Ok(()) | Err(Error::DestroyedNodeAccess(_)) | Err(Error::UnknownNode(_)) => {}
                Err(err) => return Err(err),
            }
        }
        if let Some(parent) = parent {
            let mut tree = self.inner.tree.borrow_mut();
            tree.settle(parent);
            tree.settle_ancestors(parent);
        }

        tracing::debug!(
            unit = %unit,
            units = teardown.units.len(),
            nodes = teardown.nodes.len(),
            "unit destroyed"
        );
        drop(teardown);
        Ok(())
    }

    pub fn set_policy(&self, unit: UnitId, policy: RefreshPolicy) -> Result<()> {
        self.inner.tree.borrow_mut().set_policy(unit, policy)
    }

    /// Flags of a unit. Destroyed units still report their flags.
    pub fn flags(&self, unit: UnitId) -> Result<UnitFlags> {
        self.inner
            .tree
            .borrow()
            .flags(unit)
            .ok_or(Error::UnknownUnit(unit))
    }

    pub fn policy(&self, unit: UnitId) -> Result<RefreshPolicy> {
        Ok(self.inner.tree.borrow().live(unit)?.policy())
    }

    pub fn parent(&self, unit: UnitId) -> Result<Option<UnitId>> {
        Ok(self.inner.tree.borrow().live(unit)?.parent())
    }

    pub fn children(&self, unit: UnitId) -> Result<Vec<UnitId>> {
        Ok(self.inner.tree.borrow().live(unit)?.children().to_vec())
    }

    pub fn root_of(&self, unit: UnitId) -> Result<UnitId> {
        let tree = self.inner.tree.borrow();
        tree.live(unit)?;
        Ok(tree.root_of(unit))
    }

    /// Serializable dump of a subtree.
    pub fn snapshot(&self, root: UnitId) -> Result<UnitSnapshot> {
        self.inner
            .tree
            .borrow()
            .snapshot(root)
            .ok_or(Error::UnknownUnit(root))
    }
}

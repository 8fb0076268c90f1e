//! View Tree
//!
//! Arena of view units keyed by [`UnitId`]. The tree only knows about
//! structure and flags; it never calls into bindings or the graph. The
//! runtime drives it (see `view/mod.rs` and the scheduler).
//!
//! # Ancestor marks
//!
//! Marking a unit dirty outside a tick walks its ancestors and sets
//! `HAS_DESCENDANT_TO_REFRESH` until it meets an ancestor that already has
//! the bit. Every ancestor above such a unit carries the bit as well, so the
//! walk stops early and a targeted pass can find the unit from the root
//! without scanning unrelated subtrees.

use std::collections::HashMap;

use serde::Serialize;
use smallvec::SmallVec;

use super::flags::{RefreshPolicy, UnitFlags};
use super::unit::{Binding, UnitId, ViewUnit};
use crate::error::{Error, Result};
use crate::graph::NodeId;

/// Position of a unit in pre-order, as child indices from the root.
pub type PreorderKey = SmallVec<[usize; 8]>;

/// Everything released by destroying a subtree.
#[derive(Default)]
pub struct Teardown {
    /// Destroyed units in pre-order, subtree root first.
    pub units: Vec<UnitId>,
    /// Graph nodes owned by those units.
    pub nodes: Vec<NodeId>,
    /// Bindings taken out of those units. Dropped by the caller once no tree
    /// borrow is held.
    pub bindings: Vec<Box<dyn Binding>>,
}

/// Serializable dump of a subtree, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitSnapshot {
    pub id: u64,
    pub policy: RefreshPolicy,
    pub attached: bool,
    pub destroyed: bool,
    pub dirty: bool,
    pub refresh_needed: bool,
    pub has_descendant_to_refresh: bool,
    pub bindings: usize,
    pub children: Vec<UnitSnapshot>,
}

#[derive(Debug, Default)]
pub struct ViewTree {
    units: HashMap<UnitId, ViewUnit>,
    roots: Vec<UnitId>,
}

impl ViewTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a unit, appending it to its parent's children (or the roots).
    pub fn insert(&mut self, unit: ViewUnit) -> Result<UnitId> {
        let id = unit.id();
        match unit.parent() {
            Some(parent) => self.live_mut(parent)?.children.push(id),
            None => self.roots.push(id),
        }
        self.units.insert(id, unit);
        Ok(id)
    }

    pub fn get(&self, id: UnitId) -> Option<&ViewUnit> {
        self.units.get(&id)
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut ViewUnit> {
        self.units.get_mut(&id)
    }

    /// Look up a unit that must exist and must not be destroyed.
    pub fn live(&self, id: UnitId) -> Result<&ViewUnit> {
        match self.units.get(&id) {
            None => Err(Error::UnknownUnit(id)),
            Some(unit) if unit.is_destroyed() => Err(Error::destroyed(id)),
            Some(unit) => Ok(unit),
        }
    }

    pub fn live_mut(&mut self, id: UnitId) -> Result<&mut ViewUnit> {
        match self.units.get_mut(&id) {
            None => Err(Error::UnknownUnit(id)),
            Some(unit) if unit.is_destroyed() => Err(Error::destroyed(id)),
            Some(unit) => Ok(unit),
        }
    }

    pub fn is_live(&self, id: UnitId) -> bool {
        self.live(id).is_ok()
    }

    pub fn flags(&self, id: UnitId) -> Option<UnitFlags> {
        self.units.get(&id).map(|unit| unit.flags)
    }

    pub fn roots(&self) -> &[UnitId] {
        &self.roots
    }

    /// Follow parent links to the top of the tree.
    pub fn root_of(&self, id: UnitId) -> UnitId {
        let mut current = id;
        while let Some(parent) = self.units.get(&current).and_then(|unit| unit.parent()) {
            current = parent;
        }
        current
    }

    /// Set only the local Dirty bit. Used while a tick is running.
    pub fn mark_local(&mut self, id: UnitId) -> Result<()> {
        self.live_mut(id)?.flags.insert(UnitFlags::DIRTY);
        Ok(())
    }

    /// Set Dirty and RefreshNeeded, then mark ancestors. Returns the root.
    ///
    /// A detached unit keeps its dirt to itself; `reattach` walks for it.
    pub fn mark_dirty(&mut self, id: UnitId) -> Result<UnitId> {
        let unit = self.live_mut(id)?;
        unit.flags.insert(UnitFlags::NEEDS_REFRESH);
        if unit.is_attached() {
            Ok(self.mark_ancestors(id))
        } else {
            Ok(self.root_of(id))
        }
    }

    /// Set `HAS_DESCENDANT_TO_REFRESH` on ancestors of `id`, stopping at the
    /// first one that already has it. Returns the root.
    pub fn mark_ancestors(&mut self, id: UnitId) -> UnitId {
        let mut current = id;
        while let Some(parent) = self.units.get(&current).and_then(|unit| unit.parent()) {
            let Some(unit) = self.units.get_mut(&parent) else {
                break;
            };
            if unit.flags.contains(UnitFlags::HAS_DESCENDANT_TO_REFRESH) {
                return self.root_of(parent);
            }
            unit.flags.insert(UnitFlags::HAS_DESCENDANT_TO_REFRESH);
            current = parent;
        }
        current
    }

    /// Recompute `HAS_DESCENDANT_TO_REFRESH` of `id` from its visible
    /// children. Returns whether the bit is set afterwards.
    pub fn settle(&mut self, id: UnitId) -> bool {
        let pending = match self.units.get(&id) {
            Some(unit) => unit.children.iter().any(|child| {
                self.units
                    .get(child)
                    .is_some_and(|c| c.flags.is_visible() && c.flags.is_pending())
            }),
            None => return false,
        };
        if let Some(unit) = self.units.get_mut(&id) {
            unit.flags.set(UnitFlags::HAS_DESCENDANT_TO_REFRESH, pending);
        }
        pending
    }

    /// Settle every ancestor of `id`, bottom-up.
    pub fn settle_ancestors(&mut self, id: UnitId) {
        let mut current = self.units.get(&id).and_then(|unit| unit.parent());
        while let Some(parent) = current {
            self.settle(parent);
            current = self.units.get(&parent).and_then(|unit| unit.parent());
        }
    }

    pub fn set_attached(&mut self, id: UnitId, attached: bool) -> Result<UnitFlags> {
        let unit = self.live_mut(id)?;
        unit.flags.set(UnitFlags::ATTACHED, attached);
        Ok(unit.flags)
    }

    pub fn set_policy(&mut self, id: UnitId, policy: RefreshPolicy) -> Result<()> {
        self.live_mut(id)?.set_policy(policy);
        Ok(())
    }

    /// Pre-order position of `id` below `root`, or `None` when `id` is not
    /// reachable from `root` through attached, live units.
    ///
    /// `root` itself only needs to be live; its attachment is the caller's
    /// concern.
    pub fn preorder_key(&self, root: UnitId, id: UnitId) -> Option<PreorderKey> {
        let mut key = PreorderKey::new();
        let mut current = id;
        while current != root {
            let unit = self.units.get(&current)?;
            if !unit.flags.is_visible() {
                return None;
            }
            let parent = unit.parent()?;
            let index = self
                .units
                .get(&parent)?
                .children
                .iter()
                .position(|child| *child == current)?;
            key.push(index);
            current = parent;
        }
        if self.get(root)?.is_destroyed() {
            return None;
        }
        key.reverse();
        Some(key)
    }

    /// Destroy `id` and its whole subtree.
    pub fn destroy(&mut self, id: UnitId) -> Result<Teardown> {
        let parent = self.live(id)?.parent();
        match parent {
            Some(parent) => {
                if let Some(unit) = self.units.get_mut(&parent) {
                    unit.children.retain(|child| *child != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }

        let mut teardown = Teardown::default();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(unit) = self.units.get_mut(&current) else {
                continue;
            };
            if unit.is_destroyed() {
                continue;
            }
            unit.flags.remove(UnitFlags::PENDING);
            unit.flags.insert(UnitFlags::DESTROYED);
            teardown.units.push(current);
            teardown.nodes.append(&mut unit.owned);
            teardown.bindings.append(&mut unit.bindings);
            stack.extend(unit.children.iter().rev().copied());
        }
        Ok(teardown)
    }

    pub fn snapshot(&self, id: UnitId) -> Option<UnitSnapshot> {
        let unit = self.units.get(&id)?;
        let flags = unit.flags;
        Some(UnitSnapshot {
            id: id.raw(),
            policy: unit.policy(),
            attached: flags.contains(UnitFlags::ATTACHED),
            destroyed: flags.contains(UnitFlags::DESTROYED),
            dirty: flags.contains(UnitFlags::DIRTY),
            refresh_needed: flags.contains(UnitFlags::REFRESH_NEEDED),
            has_descendant_to_refresh: flags.contains(UnitFlags::HAS_DESCENDANT_TO_REFRESH),
            bindings: unit.binding_count(),
            children: unit
                .children
                .iter()
                .filter_map(|child| self.snapshot(*child))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(tree: &mut ViewTree, parent: Option<UnitId>, policy: RefreshPolicy) -> UnitId {
        tree.insert(ViewUnit::new(UnitId::new(), policy, parent, NodeId::new()))
            .unwrap()
    }

    #[test]
    fn mark_dirty_walks_to_root() {
        let mut tree = ViewTree::new();
        let root = add(&mut tree, None, RefreshPolicy::CheckAlways);
        let mid = add(&mut tree, Some(root), RefreshPolicy::OnDemand);
        let leaf = add(&mut tree, Some(mid), RefreshPolicy::OnDemand);

        assert_eq!(tree.mark_dirty(leaf).unwrap(), root);
        assert!(tree.flags(leaf).unwrap().contains(UnitFlags::NEEDS_REFRESH));
        assert!(tree.flags(mid).unwrap().contains(UnitFlags::HAS_DESCENDANT_TO_REFRESH));
        assert!(tree.flags(root).unwrap().contains(UnitFlags::HAS_DESCENDANT_TO_REFRESH));
        assert!(!tree.flags(root).unwrap().needs_refresh());
    }

    #[test]
    fn ancestor_walk_short_circuits() {
        let mut tree = ViewTree::new();
        let root = add(&mut tree, None, RefreshPolicy::OnDemand);
        let mid = add(&mut tree, Some(root), RefreshPolicy::OnDemand);
        let a = add(&mut tree, Some(mid), RefreshPolicy::OnDemand);
        let b = add(&mut tree, Some(mid), RefreshPolicy::OnDemand);

        tree.mark_dirty(a).unwrap();
        // Clear the root bit behind the tree's back: a short-circuiting walk
        // from `b` stops at `mid` and never restores it.
        tree.get_mut(root)
            .unwrap()
            .flags
            .remove(UnitFlags::HAS_DESCENDANT_TO_REFRESH);
        assert_eq!(tree.mark_dirty(b).unwrap(), root);
        assert!(!tree.flags(root).unwrap().contains(UnitFlags::HAS_DESCENDANT_TO_REFRESH));
    }

    #[test]
    fn preorder_keys_follow_declaration_order() {
        let mut tree = ViewTree::new();
        let root = add(&mut tree, None, RefreshPolicy::OnDemand);
        let a = add(&mut tree, Some(root), RefreshPolicy::OnDemand);
        let b = add(&mut tree, Some(root), RefreshPolicy::OnDemand);
        let a1 = add(&mut tree, Some(a), RefreshPolicy::OnDemand);

        let mut units = vec![b, a1, root, a];
        units.sort_by_key(|id| tree.preorder_key(root, *id).unwrap());
        assert_eq!(units, vec![root, a, a1, b]);
    }

    #[test]
    fn detached_units_have_no_key() {
        let mut tree = ViewTree::new();
        let root = add(&mut tree, None, RefreshPolicy::OnDemand);
        let a = add(&mut tree, Some(root), RefreshPolicy::OnDemand);
        let a1 = add(&mut tree, Some(a), RefreshPolicy::OnDemand);

        tree.set_attached(a, false).unwrap();
        assert!(tree.preorder_key(root, a1).is_none());
        assert!(tree.preorder_key(a, a1).is_some());
    }

    #[test]
    fn destroy_cascades() {
        let mut tree = ViewTree::new();
        let root = add(&mut tree, None, RefreshPolicy::OnDemand);
        let a = add(&mut tree, Some(root), RefreshPolicy::OnDemand);
        let a1 = add(&mut tree, Some(a), RefreshPolicy::OnDemand);
        let a2 = add(&mut tree, Some(a), RefreshPolicy::OnDemand);

        let teardown = tree.destroy(a).unwrap();
        assert_eq!(teardown.units, vec![a, a1, a2]);
        assert_eq!(teardown.nodes.len(), 3);
        assert!(tree.get(root).unwrap().children().is_empty());
        for id in [a, a1, a2] {
            assert!(tree.flags(id).unwrap().contains(UnitFlags::DESTROYED));
        }
        assert_eq!(tree.mark_dirty(a1).unwrap_err(), Error::destroyed(a1));
    }

    #[test]
    fn settle_ignores_detached_children() {
        let mut tree = ViewTree::new();
        let root = add(&mut tree, None, RefreshPolicy::OnDemand);
        let a = add(&mut tree, Some(root), RefreshPolicy::OnDemand);
        tree.mark_dirty(a).unwrap();
        assert!(tree.settle(root));

        tree.set_attached(a, false).unwrap();
        assert!(!tree.settle(root));
    }
}

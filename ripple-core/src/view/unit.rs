//! View units and their bindings.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::graph::NodeId;
use crate::reactive::Runtime;

use super::flags::{RefreshPolicy, UnitFlags};

/// Unique identifier for a view unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for UnitId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit #{}", self.0)
    }
}

/// Something a unit refreshes when it is visited.
///
/// Bindings run under the unit's tracking consumer: every node they read
/// subscribes the unit, so a later write to that node marks the unit dirty.
pub trait Binding {
    fn refresh(&mut self, runtime: &Runtime, unit: UnitId) -> Result<()>;
}

impl<F> Binding for F
where
    F: FnMut(&Runtime, UnitId) -> Result<()>,
{
    fn refresh(&mut self, runtime: &Runtime, unit: UnitId) -> Result<()> {
        self(runtime, unit)
    }
}

/// One node of the view tree.
pub struct ViewUnit {
    id: UnitId,
    policy: RefreshPolicy,
    pub(crate) flags: UnitFlags,
    parent: Option<UnitId>,
    pub(crate) children: Vec<UnitId>,

    /// Consumer node the bindings are tracked under.
    view_node: NodeId,

    pub(crate) bindings: Vec<Box<dyn Binding>>,

    /// Graph nodes destroyed together with this unit.
    pub(crate) owned: Vec<NodeId>,
}

impl ViewUnit {
    pub(crate) fn new(
        id: UnitId,
        policy: RefreshPolicy,
        parent: Option<UnitId>,
        view_node: NodeId,
    ) -> Self {
        Self {
            id,
            policy,
            flags: UnitFlags::ATTACHED,
            parent,
            children: Vec::new(),
            view_node,
            bindings: Vec::new(),
            owned: vec![view_node],
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub(crate) fn set_policy(&mut self, policy: RefreshPolicy) {
        self.policy = policy;
    }

    pub fn flags(&self) -> UnitFlags {
        self.flags
    }

    pub fn parent(&self) -> Option<UnitId> {
        self.parent
    }

    pub fn children(&self) -> &[UnitId] {
        &self.children
    }

    pub fn view_node(&self) -> NodeId {
        self.view_node
    }

    pub fn is_destroyed(&self) -> bool {
        self.flags.contains(UnitFlags::DESTROYED)
    }

    pub fn is_attached(&self) -> bool {
        self.flags.contains(UnitFlags::ATTACHED)
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Whether this unit is refreshed when visited in a normal pass.
    pub fn wants_refresh(&self) -> bool {
        self.policy == RefreshPolicy::CheckAlways || self.flags.needs_refresh()
    }
}

impl fmt::Debug for ViewUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewUnit")
            .field("id", &self.id)
            .field("policy", &self.policy)
            .field("flags", &self.flags)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_ids_are_unique() {
        assert_ne!(UnitId::new(), UnitId::new());
    }

    #[test]
    fn new_unit_is_attached_and_owns_its_view_node() {
        let view_node = NodeId::new();
        let unit = ViewUnit::new(UnitId::new(), RefreshPolicy::OnDemand, None, view_node);
        assert!(unit.is_attached());
        assert!(!unit.is_destroyed());
        assert_eq!(unit.owned, vec![view_node]);
        assert!(!unit.wants_refresh());
    }

    #[test]
    fn check_always_always_wants_refresh() {
        let unit = ViewUnit::new(UnitId::new(), RefreshPolicy::CheckAlways, None, NodeId::new());
        assert!(unit.wants_refresh());
    }
}

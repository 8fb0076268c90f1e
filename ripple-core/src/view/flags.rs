//! Unit status flags and refresh policy.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Status bits of a view unit. Every bit is independently observable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UnitFlags: u8 {
        /// Visible to traversal. Cleared by `detach`.
        const ATTACHED                  = 0b0000_0001;
        /// Terminal. Set on the unit and every descendant by `destroy_unit`.
        const DESTROYED                 = 0b0000_0010;
        /// Explicitly marked, or owns a node that was dirtied.
        const DIRTY                     = 0b0000_0100;
        /// Must refresh on the next visit regardless of policy.
        const REFRESH_NEEDED            = 0b0000_1000;
        /// Some descendant carries dirt; traversal must descend even if this
        /// unit itself is skipped.
        const HAS_DESCENDANT_TO_REFRESH = 0b0001_0000;
    }
}

impl UnitFlags {
    /// Bits that make a unit refresh on its next visit.
    pub const NEEDS_REFRESH: Self = Self::DIRTY.union(Self::REFRESH_NEEDED);

    /// Bits that make an ancestor descend towards this unit.
    pub const PENDING: Self = Self::NEEDS_REFRESH.union(Self::HAS_DESCENDANT_TO_REFRESH);

    #[inline]
    pub fn needs_refresh(self) -> bool {
        self.intersects(Self::NEEDS_REFRESH)
    }

    #[inline]
    pub fn is_pending(self) -> bool {
        self.intersects(Self::PENDING)
    }

    /// Attached and not destroyed.
    #[inline]
    pub fn is_visible(self) -> bool {
        self.contains(Self::ATTACHED) && !self.contains(Self::DESTROYED)
    }
}

/// How a unit takes part in traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RefreshPolicy {
    /// Refreshed on every visit.
    #[default]
    CheckAlways,
    /// Refreshed only when Dirty or RefreshNeeded is set.
    OnDemand,
}

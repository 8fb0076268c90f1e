//! Scheduler
//!
//! Drives traversal of the view tree. A pass walks the tree depth-first in
//! pre-order and refreshes every unit that asks for it:
//!
//! 1. Destroyed and detached units are skipped with their subtrees.
//! 2. An `OnDemand` unit without Dirty or RefreshNeeded is not refreshed,
//!    but traversal still descends when it carries
//!    `HAS_DESCENDANT_TO_REFRESH`.
//! 3. Refreshing a unit clears its dirt, runs its queued effects, then its
//!    bindings, and then visits its children in declaration order.
//!
//! # Targeted Retry
//!
//! Bindings and effects may write sources or mark units during a pass.
//! Those units only get their Dirty bit and are recorded. After the full
//! pass, recorded units that are still dirty are replayed, alone and in tree
//! pre-order, and the loop repeats until nothing is left. A tree that keeps
//! re-dirtying itself is cut off after `max_reruns` targeted passes with
//! [`Error::InfiniteRefresh`].

use indexmap::IndexSet;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::reactive::{FrameKind, OwnerScope, ReactiveContext, Runtime};
use crate::view::{PreorderKey, RefreshPolicy, UnitFlags, UnitId};

/// Outcome of one `tick` or `force_refresh`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Unit refreshes, counting repeats.
    pub refreshed: usize,
    /// Effect bodies run by the pass.
    pub effects_run: usize,
    /// Targeted passes after the first one.
    pub targeted_passes: usize,
}

/// Per-runtime bookkeeping for the pass in progress.
#[derive(Debug, Default)]
pub(crate) struct PassState {
    pub(crate) active: bool,
    /// Units marked since the last (targeted) pass started.
    marked: IndexSet<UnitId>,
    /// Every unit marked during the whole tick.
    touched: IndexSet<UnitId>,
}

impl PassState {
    pub(crate) fn record(&mut self, unit: UnitId) {
        self.marked.insert(unit);
        self.touched.insert(unit);
    }

    pub(crate) fn forget(&mut self, units: &[UnitId]) {
        for unit in units {
            self.marked.shift_remove(unit);
            self.touched.shift_remove(unit);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Tick,
    Force,
}

/// Marks the runtime as inside a pass until dropped.
struct PassGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> PassGuard<'a> {
    fn begin(runtime: &'a Runtime) -> Result<Self> {
        let mut pass = runtime.inner.pass.borrow_mut();
        if pass.active {
            return Err(Error::ReentrantTick);
        }
        pass.active = true;
        pass.marked.clear();
        pass.touched.clear();
        Ok(Self { runtime })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.runtime.inner.pass.borrow_mut().active = false;
    }
}

impl Runtime {
    /// Run a scheduling pass over `root` and everything below it.
    ///
    /// A destroyed or detached root makes the tick a no-op.
    pub fn tick(&self, root: UnitId) -> Result<TickReport> {
        self.run_pass(root, Mode::Tick)
    }

    /// Refresh `unit` and its attached descendants regardless of their
    /// flags and policies, then retry like `tick`.
    pub fn force_refresh(&self, unit: UnitId) -> Result<TickReport> {
        self.run_pass(unit, Mode::Force)
    }

    /// Whether a tick or forced refresh is running.
    pub fn in_pass(&self) -> bool {
        self.inner.pass.borrow().active
    }

    fn run_pass(&self, root: UnitId, mode: Mode) -> Result<TickReport> {
        let guard = PassGuard::begin(self)?;

        let flags = self
            .inner
            .tree
            .borrow()
            .flags(root)
            .ok_or(Error::UnknownUnit(root))?;
        if flags.contains(UnitFlags::DESTROYED) {
            return match mode {
                Mode::Tick => Ok(TickReport::default()),
                Mode::Force => Err(Error::destroyed(root)),
            };
        }
        if mode == Mode::Tick && !flags.contains(UnitFlags::ATTACHED) {
            return Ok(TickReport::default());
        }

        // Only a pass that actually runs closes the pending window.
        self.inner.trigger.begin_tick();
        tracing::debug!(root = %root, ?mode, "pass started");
        let mut report = TickReport::default();
        let result = self.drive(root, mode, &mut report);
        drop(guard);

        self.finish_pass(root, result.is_ok());
        match &result {
            Ok(()) => tracing::debug!(
                root = %root,
                refreshed = report.refreshed,
                effects = report.effects_run,
                targeted = report.targeted_passes,
                "pass finished"
            ),
            Err(err) if err.is_fatal() => tracing::error!(root = %root, error = %err, "pass aborted"),
            Err(err) => tracing::debug!(root = %root, error = %err, "pass failed"),
        }
        result.map(|()| report)
    }

    fn drive(&self, root: UnitId, mode: Mode, report: &mut TickReport) -> Result<()> {
        report.effects_run += self.flush_pending(None)?;
        self.visit(root, mode, true, report)?;

        let mut passes = 0;
        loop {
            let targets = self.take_targets(root);
            if targets.is_empty() && !self.has_unowned_pending() {
                return Ok(());
            }
            if passes >= self.inner.config.max_reruns {
                return Err(Error::InfiniteRefresh { root, passes });
            }
            passes += 1;
            report.targeted_passes = passes;
            tracing::debug!(root = %root, pass = passes, targets = targets.len(), "targeted pass");

            report.effects_run += self.flush_pending(None)?;
            for unit in targets {
                let due = self
                    .inner
                    .tree
                    .borrow()
                    .flags(unit)
                    .is_some_and(|f| !f.contains(UnitFlags::DESTROYED) && f.needs_refresh());
                if due {
                    self.refresh_unit(unit, report)?;
                    self.inner.tree.borrow_mut().settle_ancestors(unit);
                }
            }
        }
    }

    fn visit(&self, unit: UnitId, mode: Mode, is_root: bool, report: &mut TickReport) -> Result<()> {
        let (flags, policy) = match self.inner.tree.borrow().get(unit) {
            Some(u) => (u.flags(), u.policy()),
            None => return Ok(()),
        };
        if flags.contains(UnitFlags::DESTROYED) {
            return Ok(());
        }
        // A forced refresh may target a detached unit directly.
        if !flags.contains(UnitFlags::ATTACHED) && !(mode == Mode::Force && is_root) {
            return Ok(());
        }

        let refresh =
            mode == Mode::Force || policy == RefreshPolicy::CheckAlways || flags.needs_refresh();
        if refresh {
            self.refresh_unit(unit, report)?;
        }

        let children = {
            let tree = self.inner.tree.borrow();
            match tree.get(unit) {
                Some(u) if !u.is_destroyed() => {
                    if refresh || u.flags().contains(UnitFlags::HAS_DESCENDANT_TO_REFRESH) {
                        Some(u.children().to_vec())
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        if let Some(children) = children {
            for child in children {
                self.visit(child, mode, false, report)?;
            }
            self.inner.tree.borrow_mut().settle(unit);
        }
        Ok(())
    }

    fn refresh_unit(&self, unit: UnitId, report: &mut TickReport) -> Result<()> {
        // Cleared first so a unit that marks itself while refreshing stays
        // dirty for the retry.
        match self.inner.tree.borrow_mut().get_mut(unit) {
            Some(u) if !u.is_destroyed() => u.flags.remove(UnitFlags::NEEDS_REFRESH),
            _ => return Ok(()),
        }
        tracing::trace!(unit = %unit, "refreshing");

        let result = self
            .flush_pending(Some(unit))
            .and_then(|ran| {
                report.effects_run += ran;
                self.run_bindings(unit)
            });
        if let Err(err) = result {
            if self.inner.tree.borrow().is_live(unit) {
                self.mark_unit_dirty(unit)?;
            }
            return Err(err);
        }
        report.refreshed += 1;
        Ok(())
    }

    fn run_bindings(&self, unit: UnitId) -> Result<()> {
        let (mut bindings, view_node) = match self.inner.tree.borrow_mut().get_mut(unit) {
            Some(u) if !u.is_destroyed() => (std::mem::take(&mut u.bindings), u.view_node()),
            _ => return Ok(()),
        };
        if bindings.is_empty() {
            return Ok(());
        }
        {
            let mut graph = self.inner.graph.borrow_mut();
            if let Some(node) = graph.get_mut(view_node) {
                node.mark_clean();
            }
            graph.unlink_producers(view_node);
        }

        let mut result = Ok(());
        {
            let _scope = OwnerScope::enter(&self.inner.context, unit);
            let _frame = ReactiveContext::enter(&self.inner.context, view_node, FrameKind::Effect);
            for binding in bindings.iter_mut() {
                result = binding.refresh(self, unit);
                if result.is_err() {
                    break;
                }
            }
        }

        let orphaned = {
            let mut tree = self.inner.tree.borrow_mut();
            match tree.get_mut(unit) {
                Some(u) if !u.is_destroyed() => {
                    // Bindings added while refreshing go after the existing ones.
                    let added = std::mem::replace(&mut u.bindings, bindings);
                    u.bindings.extend(added);
                    None
                }
                _ => Some(bindings),
            }
        };
        drop(orphaned);
        result
    }

    /// Units recorded since the last call that are still dirty and
    /// reachable from `root`, in pre-order.
    fn take_targets(&self, root: UnitId) -> Vec<UnitId> {
        let marked = std::mem::take(&mut self.inner.pass.borrow_mut().marked);
        let tree = self.inner.tree.borrow();
        let mut targets: Vec<(PreorderKey, UnitId)> = marked
            .into_iter()
            .filter(|unit| {
                tree.flags(*unit)
                    .is_some_and(|f| !f.contains(UnitFlags::DESTROYED) && f.needs_refresh())
            })
            .filter_map(|unit| tree.preorder_key(root, unit).map(|key| (key, unit)))
            .collect();
        targets.sort_by(|a, b| a.0.cmp(&b.0));
        targets.into_iter().map(|(_, unit)| unit).collect()
    }

    /// Restore the ancestor invariant for units marked during the pass and
    /// request another tick if dirt is left over, either from this pass or
    /// in another tree whose request the pass swallowed.
    fn finish_pass(&self, ticked: UnitId, request: bool) {
        let touched = {
            let mut pass = self.inner.pass.borrow_mut();
            pass.marked.clear();
            std::mem::take(&mut pass.touched)
        };

        let mut leftover = false;
        {
            let mut tree = self.inner.tree.borrow_mut();
            for unit in touched {
                let dirty = tree
                    .flags(unit)
                    .is_some_and(|f| f.is_visible() && f.needs_refresh());
                if dirty {
                    tree.mark_ancestors(unit);
                    leftover = true;
                }
            }
            if tree.is_live(ticked) {
                tree.settle_ancestors(ticked);
            }
            let stale = tree.roots().iter().copied().find(|root| {
                tree.flags(*root)
                    .is_some_and(|f| f.is_visible() && f.is_pending())
            });
            if let Some(stale) = stale {
                tracing::trace!(root = %stale, ticked = %ticked, "tree still pending");
                leftover = true;
            }
        }

        if request && (leftover || self.has_unowned_pending()) {
            tracing::debug!("dirt left after pass");
            self.schedule_tick();
        }
    }
}

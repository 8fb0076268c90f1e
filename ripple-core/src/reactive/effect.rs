//! Effects
//!
//! An effect is a side-effecting computation that reruns whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its body immediately to establish its
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is marked dirty and queued.
//!    It does not run synchronously inside the write.
//!
//! 3. The next scheduling pass flushes the queue. Unowned effects run at the
//!    start of every pass; an effect created under a unit runs when that
//!    unit refreshes.
//!
//! 4. Before rerunning, the effect drops its old dependencies and tracks new
//!    ones during execution.
//!
//! # Differences from Derived Values
//!
//! - Derived values return a value; effects do not.
//! - Derived values are lazy; effects are eager.
//! - Effects may write sources. The writes propagate as usual and, during a
//!   pass, are picked up by the bounded targeted retry.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::{NodeHandle, Runtime};
use crate::error::Result;
use crate::graph::{Node, NodeId};

/// Handle to an effect node.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Effect {
    id: NodeId,
}

impl Effect {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Destroy the effect, cancelling any queued rerun.
    pub fn dispose(&self, runtime: &Runtime) -> Result<()> {
        runtime.destroy(*self)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Effect").field(&self.id).finish()
    }
}

impl NodeHandle for Effect {
    fn node(&self) -> NodeId {
        self.id
    }
}

impl Runtime {
    /// Create an effect and run it once.
    ///
    /// If the first run fails the effect is destroyed and the error
    /// returned.
    pub fn create_effect<F>(&self, body: F) -> Result<Effect>
    where
        F: FnMut(&Runtime) -> Result<()> + 'static,
    {
        let mut node = Node::effect();
        node.effect = Some(Rc::new(RefCell::new(body)));
        let id = self.create_node(node);

        if let Err(err) = self.run_effect(id) {
            self.destroy_node(id)?;
            return Err(err);
        }
        Ok(Effect { id })
    }

    /// Number of effects waiting for the next pass.
    pub fn pending_effects(&self) -> usize {
        self.inner.pending.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::Cell;

    #[test]
    fn effect_runs_on_creation() {
        let rt = Runtime::new();
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        rt.create_effect(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        })
        .unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(rt.stats().effect_runs, 1);
    }

    #[test]
    fn write_queues_instead_of_running() {
        let rt = Runtime::new();
        let source = rt.create_source(0);
        let seen = Rc::new(Cell::new(-1));
        let sink = seen.clone();
        let effect = rt
            .create_effect(move |rt| {
                sink.set(rt.read(source)?);
                Ok(())
            })
            .unwrap();

        source.set(&rt, 7).unwrap();
        assert_eq!(seen.get(), 0);
        assert!(rt.is_dirty(effect).unwrap());
        assert_eq!(rt.pending_effects(), 1);

        rt.flush_pending(None).unwrap();
        assert_eq!(seen.get(), 7);
        assert_eq!(rt.pending_effects(), 0);
    }

    #[test]
    fn dispose_cancels_queued_rerun() {
        let rt = Runtime::new();
        let source = rt.create_source(0);
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let effect = rt
            .create_effect(move |rt| {
                rt.read(source)?;
                counter.set(counter.get() + 1);
                Ok(())
            })
            .unwrap();

        source.set(&rt, 1).unwrap();
        effect.dispose(&rt).unwrap();
        assert_eq!(rt.pending_effects(), 0);
        rt.flush_pending(None).unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn failed_first_run_destroys_effect() {
        let rt = Runtime::new();
        let before = rt.node_count();
        let err = rt
            .create_effect(|_| Err(Error::host("boom")))
            .unwrap_err();
        assert_eq!(err, Error::host("boom"));
        assert_eq!(rt.node_count(), before);
    }

    #[test]
    fn failed_rerun_stays_queued() {
        let rt = Runtime::new();
        let source = rt.create_source(0);
        let effect = rt
            .create_effect(move |rt| {
                if rt.read(source)? == 1 {
                    return Err(Error::host("one"));
                }
                Ok(())
            })
            .unwrap();

        source.set(&rt, 1).unwrap();
        assert_eq!(rt.flush_pending(None).unwrap_err(), Error::host("one"));
        assert!(rt.is_dirty(effect).unwrap());
        assert_eq!(rt.pending_effects(), 1);
    }

    #[test]
    fn effects_may_write_sources() {
        let rt = Runtime::new();
        let input = rt.create_source(1);
        let mirror = rt.create_source(0);
        rt.create_effect(move |rt| rt.write(mirror, rt.read(input)? * 10))
            .unwrap();
        assert_eq!(rt.read(mirror).unwrap(), 10);
    }
}

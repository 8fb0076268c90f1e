//! Derived Values
//!
//! A derived value is a cached computation over other nodes that
//! re-evaluates only when its dependencies change.
//!
//! # How Derived Values Work
//!
//! 1. Creating one runs nothing. The computation runs on first read and
//!    its result is cached.
//!
//! 2. When a dependency changes, the derived node is marked dirty.
//!
//! 3. On next read, the node first checks whether its producers actually
//!    moved to a new version. If not, it is marked clean and the cache is
//!    returned.
//!
//! 4. Otherwise the computation reruns. If the new result equals the cached
//!    one, the version does not move, so consumers further down keep their
//!    caches too.
//!
//! # Depth
//!
//! Refreshing a dirty chain polls its producers iteratively, deepest first,
//! so a chain that has been computed once refreshes in constant stack depth
//! however long it is. The first evaluation is different: a computation
//! reads its producers from inside its own frame, so an unread chain nests
//! one computation per link. Chains of a few hundred links evaluated cold
//! can exhaust a 2 MiB test-thread stack in debug builds; read long chains
//! as they are built, or give the first read a larger stack.
//!
//! # Failure
//!
//! A computation returns `Result`. On error the previous cache stays in
//! place, the node stays dirty, and the edges gathered by the failed run
//! are dropped.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use super::runtime::{erase_equality, NodeHandle, Readable, Runtime};
use crate::error::Result;
use crate::graph::{Node, NodeId, Value};

/// Handle to a derived node computing a `T`.
pub struct Derived<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Derived<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Derived<T> {}

impl<T> PartialEq for Derived<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Derived<T> {}

impl<T> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Derived").field(&self.id).finish()
    }
}

impl<T> NodeHandle for Derived<T> {
    fn node(&self) -> NodeId {
        self.id
    }
}

impl<T: Clone + 'static> Readable for Derived<T> {
    type Value = T;
}

impl<T: Clone + 'static> Derived<T> {
    /// Get the current value, recomputing if necessary.
    pub fn get(&self, runtime: &Runtime) -> Result<T> {
        runtime.read(*self)
    }
}

impl Runtime {
    /// Create a derived value compared with `PartialEq`.
    ///
    /// The computation is not run immediately. It runs on first read.
    pub fn create_derived<T, F>(&self, compute: F) -> Derived<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn(&Runtime) -> Result<T> + 'static,
    {
        self.create_derived_with(compute, |a: &T, b: &T| a == b)
    }

    /// Create a derived value with a custom equality predicate.
    pub fn create_derived_with<T, F, E>(&self, compute: F, equals: E) -> Derived<T>
    where
        T: Clone + 'static,
        F: Fn(&Runtime) -> Result<T> + 'static,
        E: Fn(&T, &T) -> bool + 'static,
    {
        let mut node = Node::derived();
        node.compute = Some(Rc::new(move |runtime: &Runtime| {
            compute(runtime).map(|value| Rc::new(value) as Value)
        }));
        node.equals = Some(erase_equality(equals));
        Derived {
            id: self.create_node(node),
            _marker: PhantomData,
        }
    }
}

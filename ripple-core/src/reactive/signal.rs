//! Sources
//!
//! A source is the fundamental reactive primitive. It holds a value that is
//! written from outside the graph and tracks which computations read it.
//!
//! # How Sources Work
//!
//! 1. When a source is read within a tracking computation (derived value,
//!    effect or unit binding), the computation is subscribed to it.
//!
//! 2. When a source's value changes, every subscriber reachable from it is
//!    marked dirty.
//!
//! 3. Writing a value equal to the current one (by the source's equality
//!    predicate) does nothing at all.
//!
//! # Memory Layout
//!
//! A [`Source`] handle is just a node id. The value lives in the runtime's
//! node store behind an `Rc<dyn Any>`; the handle's type parameter is what
//! the value is downcast to on read.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use super::runtime::{downcast, erase_equality, NodeHandle, Readable, Runtime};
use crate::error::Result;
use crate::graph::{Node, NodeId};

/// Handle to a source node holding a `T`.
pub struct Source<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Source<T> {
    pub(crate) fn from_node(id: NodeId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Source<T> {}

impl<T> PartialEq for Source<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Source<T> {}

impl<T> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Source").field(&self.id).finish()
    }
}

impl<T> NodeHandle for Source<T> {
    fn node(&self) -> NodeId {
        self.id
    }
}

impl<T: Clone + 'static> Readable for Source<T> {
    type Value = T;
}

impl<T: Clone + 'static> Source<T> {
    /// Read the value. See [`Runtime::read`].
    pub fn get(&self, runtime: &Runtime) -> Result<T> {
        runtime.read(*self)
    }

    /// Write the value. See [`Runtime::write`].
    pub fn set(&self, runtime: &Runtime, value: T) -> Result<()> {
        runtime.write(*self, value)
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, runtime: &Runtime, f: impl FnOnce(&T) -> T) -> Result<()> {
        runtime.update(*self, f)
    }
}

impl Runtime {
    /// Create a source compared with `PartialEq`.
    pub fn create_source<T>(&self, initial: T) -> Source<T>
    where
        T: Clone + PartialEq + 'static,
    {
        self.create_source_with(initial, |a: &T, b: &T| a == b)
    }

    /// Create a source with a custom equality predicate. A write is ignored
    /// when `equals(current, new)` holds.
    pub fn create_source_with<T, E>(&self, initial: T, equals: E) -> Source<T>
    where
        T: Clone + 'static,
        E: Fn(&T, &T) -> bool + 'static,
    {
        let mut node = Node::source();
        node.value = Some(Rc::new(initial));
        node.equals = Some(erase_equality(equals));
        Source::from_node(self.create_node(node))
    }

    /// Replace a source's value and propagate.
    ///
    /// Fails with [`Error::IllegalMutation`](crate::Error::IllegalMutation)
    /// inside a derived computation. Effects and bindings may write.
    pub fn write<T: Clone + 'static>(&self, source: Source<T>, value: T) -> Result<()> {
        // Type check before the value is erased.
        let current = self.peek_value(source.id)?;
        downcast::<T>(source.id, &current)?;
        drop(current);
        self.write_value(source.id, Rc::new(value))
    }

    /// Sugar for `write(source, f(&current))`. The current value is read
    /// without tracking.
    pub fn update<T: Clone + 'static>(&self, source: Source<T>, f: impl FnOnce(&T) -> T) -> Result<()> {
        let current = downcast::<T>(source.id, &self.peek_value(source.id)?)?;
        self.write(source, f(&current))
    }
}

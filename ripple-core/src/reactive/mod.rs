//! Reactive Primitives
//!
//! This module implements the core reactive system: sources, derived values
//! and effects, all living in a [`Runtime`].
//!
//! # Concepts
//!
//! ## Sources
//!
//! A source is a container for mutable state. When a source is read within a
//! tracking computation (a derived value, an effect or a unit binding), the
//! computation is subscribed to it. When the source changes, everything
//! downstream is marked dirty.
//!
//! ## Derived values
//!
//! A derived value caches the result of a pure computation. It re-evaluates
//! only when read while dirty, and only if one of its producers actually
//! changed.
//!
//! ## Effects
//!
//! An effect is a side-effecting computation. It runs once at creation and
//! is queued for the next scheduling pass whenever its dependencies change.
//!
//! # Implementation Notes
//!
//! Handles are plain ids and carry no reference to the runtime; every
//! operation goes through a `&Runtime`. Dependencies are detected
//! automatically: the runtime keeps a stack of running computations and
//! links each read to the one on top.

mod context;
mod effect;
mod memo;
mod runtime;
mod signal;

pub use effect::Effect;
pub use memo::Derived;
pub use runtime::{GraphStats, NodeHandle, Readable, Runtime};
pub use signal::Source;

pub(crate) use context::{FrameKind, OwnerScope, ReactiveContext};

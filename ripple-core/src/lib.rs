//! Ripple Core
//!
//! This crate provides a fine-grained reactive runtime paired with a
//! hierarchical view scheduler. It implements:
//!
//! - Reactive primitives (sources, derived values, effects)
//! - Push-dirty, pull-recompute propagation that never observes a glitch
//! - A tree of view units refreshed by a bounded, re-entrancy safe scheduler
//! - A trigger boundary through which hosts learn that a tick is due
//!
//! The crate is designed to be used both as a native Rust library and, with
//! the `python` feature, as a Python extension module via PyO3.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Node storage, edges and dirty propagation
//! - `reactive`: The runtime and the typed handles
//! - `view`: View units, their flags and the tree they form
//! - `scheduler`: Tick traversal and targeted retry
//! - `trigger`: Tick requests, coalescing and quiet scopes
//! - `host`: Adapters for async hosts
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{RefreshPolicy, Runtime};
//!
//! let rt = Runtime::new();
//! let count = rt.create_source(0);
//! let doubled = rt.create_derived(move |rt| Ok(rt.read(count)? * 2));
//!
//! let root = rt.create_unit(None, RefreshPolicy::OnDemand)?;
//! rt.bind(root, move |rt, _| {
//!     println!("doubled = {}", rt.read(doubled)?);
//!     Ok(())
//! })?;
//! rt.tick(root)?; // prints "doubled = 0"
//!
//! count.set(&rt, 5)?;
//! rt.tick(root)?; // prints "doubled = 10"
//! # Ok::<(), ripple_core::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod host;
pub mod reactive;
pub mod scheduler;
pub mod trigger;
pub mod view;

#[cfg(feature = "python")]
mod python;

pub use config::RuntimeConfig;
pub use error::{Error, Result, Target};
pub use graph::{NodeId, NodeKind};
pub use reactive::{Derived, Effect, GraphStats, NodeHandle, Readable, Runtime, Source};
pub use scheduler::TickReport;
pub use trigger::{QuietGuard, TriggerHandle, TriggerStats, TriggerSubscription};
pub use view::{Binding, RefreshPolicy, UnitFlags, UnitId, UnitSnapshot};

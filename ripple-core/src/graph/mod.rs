//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between sources, derived computations and effects.
//!
//! # Overview
//!
//! The graph is directed:
//!
//! - Nodes are sources (written from outside), derived values (cached pure
//!   computations) or effects (side-effecting readers).
//! - Edges are dependencies: if A reads B, B lists A as a consumer and A
//!   lists B as a producer.
//!
//! Edges are discovered automatically while a computation runs and rebuilt
//! from scratch on every recomputation, so they always reflect the reads of
//! the most recent successful run.
//!
//! # Design Decisions
//!
//! 1. The graph is centralized in a [`NodeStore`] per runtime rather than
//!    spread across the typed handles. Handles are plain ids.
//!
//! 2. The store is indexed by node ID for O(1) lookups.
//!
//! 3. Both directions are stored so that writes can walk consumers and
//!    recomputations can drop their stale producers without a scan.

mod node;
mod store;

pub use node::{Edge, Node, NodeId, NodeKind, Payload};
pub use store::{Destroyed, NodeStore, Propagation};

pub(crate) use node::{EqualityFn, Value};

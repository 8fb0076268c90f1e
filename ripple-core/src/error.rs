//! Error types for the Ripple runtime.
//!
//! Every failure is returned synchronously to the immediate caller. The
//! runtime never catches, logs-and-continues, or retries on its own; the only
//! internal retry is the bounded targeted-refresh loop in the scheduler, which
//! reports [`Error::InfiniteRefresh`] when it gives up.

use std::fmt;

use thiserror::Error;

use crate::graph::NodeId;
use crate::view::UnitId;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The handle an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Node(NodeId),
    Unit(UnitId),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Node(id) => id.fmt(f),
            Target::Unit(id) => id.fmt(f),
        }
    }
}

impl From<NodeId> for Target {
    fn from(id: NodeId) -> Self {
        Target::Node(id)
    }
}

impl From<UnitId> for Target {
    fn from(id: UnitId) -> Self {
        Target::Unit(id)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A derived computation read itself, directly or through other nodes,
    /// while it was already being recomputed.
    #[error("cyclic dependency: {node} was read while recomputing")]
    CyclicDependency { node: NodeId },

    /// A source was written from inside a derived computation.
    #[error("illegal mutation of {node} while {consumer} is recomputing")]
    IllegalMutation { node: NodeId, consumer: NodeId },

    /// The handle was destroyed.
    #[error("access to destroyed {0}")]
    DestroyedNodeAccess(Target),

    /// Units kept re-dirtying each other past the retry bound.
    #[error("infinite refresh under {root}: still dirty after {passes} targeted passes")]
    InfiniteRefresh { root: UnitId, passes: usize },

    #[error("unknown {0}")]
    UnknownNode(NodeId),

    #[error("unknown {0}")]
    UnknownUnit(UnitId),

    /// The stored value does not have the type the handle claims.
    #[error("{node} does not hold a value of type {expected}")]
    TypeMismatch {
        node: NodeId,
        expected: &'static str,
    },

    /// `tick` or `force_refresh` was called from inside a running pass.
    #[error("tick requested while a pass is already running")]
    ReentrantTick,

    /// A binding, effect or host callback reported a failure of its own.
    #[error("host callback failed: {message}")]
    Host { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl Error {
    /// Whether the host should treat this error as a design defect rather
    /// than a recoverable condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InfiniteRefresh { .. })
    }

    /// Wrap a failure raised by user code.
    pub fn host(message: impl Into<String>) -> Self {
        Error::Host {
            message: message.into(),
        }
    }

    pub(crate) fn destroyed(target: impl Into<Target>) -> Self {
        Error::DestroyedNodeAccess(target.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config {
            message: err.to_string(),
        }
    }
}

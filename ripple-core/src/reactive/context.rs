//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a node is read, the
//! runtime links it to the consumer on top of the stack.
//!
//! # Implementation
//!
//! Each runtime owns one stack. Running a derived computation, an effect or
//! a unit's bindings pushes a frame; the guard pops it when dropped, so the
//! previous consumer is restored even on early return.
//!
//! A second, independent stack records the unit that owns nodes created
//! right now. Effects and bindings push their unit so that nodes they create
//! are torn down with it.

use std::cell::RefCell;

use crate::graph::NodeId;
use crate::view::UnitId;

/// What kind of computation a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A derived computation. Writes are illegal while one is on the stack.
    Derived,
    /// An effect body or a unit's bindings.
    Effect,
    /// An `untracked` section. Reads register no edges.
    Untracked,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    consumer: Option<NodeId>,
    kind: FrameKind,
}

#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    frames: Vec<Frame>,
    owners: Vec<UnitId>,
}

impl ContextStack {
    /// The node that reads are currently attributed to.
    pub fn current_consumer(&self) -> Option<NodeId> {
        self.frames.last().and_then(|frame| frame.consumer)
    }

    /// The innermost derived computation on the stack, if any.
    pub fn active_derived(&self) -> Option<NodeId> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.kind == FrameKind::Derived)
            .and_then(|frame| frame.consumer)
    }

    pub fn current_owner(&self) -> Option<UnitId> {
        self.owners.last().copied()
    }
}

/// Guard that pops the context frame when dropped.
pub(crate) struct ReactiveContext<'a> {
    stack: &'a RefCell<ContextStack>,
    consumer: Option<NodeId>,
}

impl<'a> ReactiveContext<'a> {
    pub fn enter(stack: &'a RefCell<ContextStack>, consumer: NodeId, kind: FrameKind) -> Self {
        Self::push(stack, Some(consumer), kind)
    }

    /// Enter a frame with no consumer.
    pub fn untracked(stack: &'a RefCell<ContextStack>) -> Self {
        Self::push(stack, None, FrameKind::Untracked)
    }

    fn push(stack: &'a RefCell<ContextStack>, consumer: Option<NodeId>, kind: FrameKind) -> Self {
        stack.borrow_mut().frames.push(Frame { consumer, kind });
        Self { stack, consumer }
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        let popped = self.stack.borrow_mut().frames.pop();
        if let Some(frame) = popped {
            debug_assert_eq!(
                frame.consumer, self.consumer,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.consumer, frame.consumer
            );
        }
    }
}

/// Guard that makes a unit the owner of newly created nodes.
pub(crate) struct OwnerScope<'a> {
    stack: &'a RefCell<ContextStack>,
    owner: UnitId,
}

impl<'a> OwnerScope<'a> {
    pub fn enter(stack: &'a RefCell<ContextStack>, owner: UnitId) -> Self {
        stack.borrow_mut().owners.push(owner);
        Self { stack, owner }
    }
}

impl Drop for OwnerScope<'_> {
    fn drop(&mut self) {
        let popped = self.stack.borrow_mut().owners.pop();
        debug_assert_eq!(popped, Some(self.owner), "OwnerScope mismatch");
    }
}

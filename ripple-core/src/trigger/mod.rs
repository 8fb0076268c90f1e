//! Trigger Boundary
//!
//! The runtime never drives itself. When something needs a scheduling pass
//! it calls [`TriggerHandle::request_tick`], and the host, having subscribed
//! with [`Runtime::on_trigger`], eventually calls [`Runtime::tick`].
//!
//! # Coalescing
//!
//! Requests made while a tick is already pending are absorbed: subscribers
//! hear about the first request of a window and nothing more until a tick
//! begins and closes the window.
//!
//! # Threads
//!
//! The handle is `Send + Sync` so I/O completions and timers on other
//! threads can request ticks. Subscriber callbacks are invoked on whichever
//! thread made the request, after the subscriber lock is released.

mod subscriber;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

pub use subscriber::{Subscriber, SubscriberId};

use crate::reactive::Runtime;

#[derive(Default)]
struct Shared {
    pending: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
    requests: AtomicU64,
    fires: AtomicU64,
}

/// Request and notification counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriggerStats {
    /// Calls to `request_tick`, coalesced or not.
    pub requests: u64,
    /// Requests that opened a window and notified subscribers.
    pub fires: u64,
}

/// Cross-thread handle to a runtime's trigger.
#[derive(Clone, Default)]
pub struct TriggerHandle {
    shared: Arc<Shared>,
}

impl TriggerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the host for a scheduling pass. Returns `false` when the request
    /// was absorbed by an already pending one.
    pub fn request_tick(&self) -> bool {
        self.shared.requests.fetch_add(1, Ordering::Relaxed);
        if self.shared.pending.swap(true, Ordering::AcqRel) {
            tracing::trace!("tick request coalesced");
            return false;
        }
        self.shared.fires.fetch_add(1, Ordering::Relaxed);

        let callbacks: Vec<_> = self
            .shared
            .subscribers
            .lock()
            .iter()
            .map(Subscriber::callback)
            .collect();
        tracing::debug!(subscribers = callbacks.len(), "tick requested");
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Whether a tick has been requested and has not begun yet.
    pub fn is_pending(&self) -> bool {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Register a callback invoked once per coalesced window.
    pub fn subscribe<F>(&self, callback: F) -> TriggerSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let subscriber = Subscriber::new(callback);
        let id = subscriber.id();
        self.shared.subscribers.lock().push(subscriber);
        TriggerSubscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    pub fn stats(&self) -> TriggerStats {
        TriggerStats {
            requests: self.shared.requests.load(Ordering::Relaxed),
            fires: self.shared.fires.load(Ordering::Relaxed),
        }
    }

    /// Close the pending window. Called when a tick starts.
    pub(crate) fn begin_tick(&self) {
        self.shared.pending.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for TriggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerHandle")
            .field("pending", &self.is_pending())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Keeps a trigger callback registered. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct TriggerSubscription {
    id: SubscriberId,
    shared: Weak<Shared>,
}

impl TriggerSubscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Drop for TriggerSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.subscribers.lock().retain(|s| s.id() != self.id);
        }
    }
}

/// Defers tick requests until dropped. See [`Runtime::quiet`].
pub struct QuietGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for QuietGuard<'_> {
    fn drop(&mut self) {
        self.runtime.exit_quiet();
    }
}

impl Runtime {
    /// Request a scheduling pass directly.
    pub fn request_tick(&self) -> bool {
        self.inner.trigger.request_tick()
    }

    /// Subscribe to tick requests.
    pub fn on_trigger<F>(&self, callback: F) -> TriggerSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.trigger.subscribe(callback)
    }

    /// A `Send + Sync` clone of this runtime's trigger.
    pub fn trigger_handle(&self) -> TriggerHandle {
        self.inner.trigger.clone()
    }

    pub fn tick_pending(&self) -> bool {
        self.inner.trigger.is_pending()
    }

    /// Start deferring tick requests. Scopes nest.
    pub fn enter_quiet(&self) {
        self.inner.quiet.set(self.inner.quiet.get() + 1);
    }

    /// Leave a quiet scope. Leaving the outermost one with deferred dirt
    /// requests a single tick.
    pub fn exit_quiet(&self) {
        let depth = self.inner.quiet.get();
        if depth == 0 {
            tracing::warn!("exit_quiet called without a matching enter_quiet");
            return;
        }
        self.inner.quiet.set(depth - 1);
        if depth == 1 && self.inner.quiet_dirt.replace(false) {
            self.schedule_tick();
        }
    }

    /// Guard form of `enter_quiet`/`exit_quiet`.
    pub fn quiet(&self) -> QuietGuard<'_> {
        self.enter_quiet();
        QuietGuard { runtime: self }
    }

    pub fn is_quiet(&self) -> bool {
        self.inner.quiet.get() > 0
    }

    /// Route an internal tick request: absorbed during a pass, deferred
    /// while quiet, forwarded to the trigger otherwise.
    pub(crate) fn schedule_tick(&self) {
        if self.inner.pass.borrow().active {
            return;
        }
        if self.is_quiet() {
            self.inner.quiet_dirt.set(true);
            return;
        }
        self.inner.trigger.request_tick();
    }
}

//! Host adapters.
//!
//! [`TokioTicker`] turns trigger notifications into something an async host
//! loop can await:
//!
//! ```rust,ignore
//! let ticker = TokioTicker::install(&runtime);
//! loop {
//!     let report = ticker.next_tick(&runtime, root).await?;
//!     tracing::info!(refreshed = report.refreshed, "ticked");
//! }
//! ```
//!
//! The runtime is `!Send`, so the loop has to live on a current-thread
//! runtime or inside a `LocalSet`. Requests may still come from any thread
//! through [`Runtime::trigger_handle`].

use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::Result;
use crate::reactive::Runtime;
use crate::scheduler::TickReport;
use crate::trigger::TriggerSubscription;
use crate::view::UnitId;

/// Bridges tick requests to a [`tokio::sync::Notify`].
pub struct TokioTicker {
    notify: Arc<Notify>,
    _subscription: TriggerSubscription,
}

impl TokioTicker {
    /// Subscribe to `runtime`'s trigger. Unsubscribes when dropped.
    pub fn install(runtime: &Runtime) -> Self {
        let notify = Arc::new(Notify::new());
        let waker = Arc::clone(&notify);
        let subscription = runtime.on_trigger(move || waker.notify_one());
        tracing::debug!("tokio ticker installed");
        Self {
            notify,
            _subscription: subscription,
        }
    }

    /// Wait until a tick is requested. A request made before the call is
    /// not lost.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Wait for the next request, then tick `root`.
    pub async fn next_tick(&self, runtime: &Runtime, root: UnitId) -> Result<TickReport> {
        self.notified().await;
        runtime.tick(root)
    }
}

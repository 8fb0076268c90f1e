//! Trigger subscribers.
//!
//! A subscriber is a host callback that hears about tick requests. It is
//! called once per coalesced window, from whichever thread made the request
//! that opened the window.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Identity of a subscription. Ids come from a process-wide counter, so
/// they are unique across runtimes and threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber#{}", self.0)
    }
}

/// A registered trigger callback.
pub struct Subscriber {
    id: SubscriberId,
    callback: Callback,
}

impl Subscriber {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: SubscriberId::new(),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Run the callback on the current thread.
    pub fn notify(&self) {
        (self.callback)();
    }

    /// The callback alone, so the trigger can run it after releasing the
    /// subscriber list.
    pub(crate) fn callback(&self) -> Callback {
        Arc::clone(&self.callback)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn ids_are_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..16).map(|_| SubscriberId::new()).collect::<Vec<_>>()))
            .collect();
        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(SubscriberId::raw)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn detached_callback_outlives_subscriber() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscriber = Subscriber::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscriber.notify();
        let callback = subscriber.callback();
        drop(subscriber);
        callback();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

//! Cooperative shutdown flag shared by the background loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct Inner {
    running: AtomicBool,
    notify: Notify,
}

/// Running flag plus a wake-up for loops sleeping between ticks
///
/// Loops check `is_running` each time they wake. `trigger` clears the flag
/// and wakes sleepers early; work already in flight is never interrupted.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                running: AtomicBool::new(true),
                notify: Notify::new(),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn trigger(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Resolve once shutdown has been triggered
    pub async fn wait(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent trigger is not missed
        notified.as_mut().enable();

        if !self.is_running() {
            return;
        }
        notified.await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

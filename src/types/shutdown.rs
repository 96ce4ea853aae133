//! Cooperative shutdown signal shared by the poller and push listeners.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Cloneable shutdown flag with an async wake-up.
///
/// Background loops check [`ShutdownSignal::triggered`] between iterations and
/// use [`ShutdownSignal::sleep`] for backoffs so a trigger interrupts the wait
/// instead of letting it run to completion.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers shutdown and wakes every waiter.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Returns true once [`trigger`](Self::trigger) has been called.
    #[must_use]
    pub fn triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`. Returns `false` if shutdown interrupted the sleep.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.triggered() {
            return false;
        }
        let notified = self.notify.notified();
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.triggered(),
            _ = notified => false,
        }
    }

    /// Resolves once shutdown has been triggered.
    pub async fn wait(&self) {
        while !self.triggered() {
            let notified = self.notify.notified();
            if self.triggered() {
                break;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.triggered())
            .finish()
    }
}

//! The broadcast shutdown signal and idempotent-close guard shared by both
//! endpoint types (§4.5 `DEAD`, §5 "Close is idempotent").

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct Shutdown {
    closed: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flips the guard exactly once, returning `true` only for the caller
    /// that performed the transition — that caller, and only that caller,
    /// should run teardown.
    pub fn begin_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Wakes every task blocked in `wait()`. Safe to call more than once.
    pub fn broadcast(&self) {
        self.notify.notify_waiters();
    }

    /// Resolves immediately if already closed; otherwise suspends until
    /// `broadcast()` is called.
    pub async fn wait(&self) {
        if self.is_closed() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

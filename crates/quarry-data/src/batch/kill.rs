//! Cross-thread kill signal.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use quarry_common::QuarryError;

/// A cloneable, first-kill-wins flag.
///
/// Whoever drives an iterator holds one clone and checks it between steps or
/// races it against a pending load; any other thread may call
/// [`kill`](Self::kill) without touching the iterator itself. Checking the
/// flag is a single atomic load.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    killed: AtomicBool,
    cause: Mutex<Option<QuarryError>>,
    notify: Notify,
}

impl KillSwitch {
    /// Creates an unarmed kill switch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Kills with `cause`. Returns false if already killed; the first cause
    /// is kept.
    pub fn kill(&self, cause: QuarryError) -> bool {
        {
            let mut slot = self.inner.cause.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(cause);
            self.inner.killed.store(true, Ordering::Release);
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Returns true once killed.
    #[inline]
    pub fn is_killed(&self) -> bool {
        self.inner.killed.load(Ordering::Acquire)
    }

    /// Returns the kill cause, if killed.
    pub fn cause(&self) -> Option<QuarryError> {
        if !self.is_killed() {
            return None;
        }
        self.inner.cause.lock().clone()
    }

    /// Resolves with the kill cause once killed.
    pub async fn killed(&self) -> QuarryError {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(cause) = self.cause() {
                return cause;
            }
            notified.await;
        }
    }
}

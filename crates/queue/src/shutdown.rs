use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Process-wide stop flag.
///
/// Cloneable; `request` is safe to call from a signal handler (an
/// atomic store plus a waiter wake-up). Blocking queue waits observe
/// the flag on their next poll tick, cooperative waits wake
/// immediately.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        while !self.is_set() {
            let notified = self.inner.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_visible_across_clones() {
        let signal = ShutdownSignal::new();
        let other = signal.clone();
        assert!(!other.is_set());
        signal.request();
        assert!(other.is_set());
    }

    #[tokio::test]
    async fn wait_resolves_after_request() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.wait().await });
        signal.request();
        task.await.unwrap();
    }
}

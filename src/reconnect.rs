//! Shared reconnect signal
//!
//! The outer scheduler sets the signal while it rotates the network identity. Every
//! waiting task observes the change at once and leaves its wait with
//! [`Signal::Reconnect`](crate::Signal::Reconnect).

use std::sync::Arc;
use tokio::sync::watch;

/// Shared "reconnect in progress" flag (cloneable, Arc-wrapped)
#[derive(Clone, Debug)]
pub struct ReconnectSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ReconnectSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectSignal {
    /// Create a cleared signal
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Mark a reconnect as in progress, waking every waiter
    pub fn set(&self) {
        tracing::info!("Reconnect in progress");
        self.tx.send_replace(true);
    }

    /// Mark the reconnect as done
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    /// Whether a reconnect is in progress
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver observing changes of the flag
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Complete once the flag is set (immediately if it already is)
    pub async fn wait_set(&self) {
        let mut rx = self.subscribe();
        loop {
            let set = *rx.borrow_and_update();
            if set {
                return;
            }
            if rx.changed().await.is_err() {
                // sender lives in self, so this only happens during teardown
                std::future::pending::<()>().await;
            }
        }
    }
}

//! Cooperative cancellation for pipeline runs.
//!
//! A `CancelHandle` owns the sending side of a `watch` channel; any number
//! of `CancelToken`s observe it. Stages check the token between steps and
//! backoff sleeps race against it.

use tokio::sync::watch;
use tracing::info;

/// Sending side. Dropping it without cancelling leaves tokens uncancelled.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observing side, cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx })
    }

    pub fn cancel(&self) {
        if !*self.tx.borrow() {
            info!("Cancellation requested");
        }
        // Fails only when every token is gone, in which case nobody cares.
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// handle is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

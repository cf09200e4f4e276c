//! Cooperative cancellation for queued operations.
//!
//! Every operation submitted to the account manager gets a token pair: the
//! worker threads the [`CancelToken`] through the operation, and the caller
//! keeps the [`CancelHandle`]. Cancelling before the operation starts makes
//! it short-circuit without side effects; cancelling during an in-flight
//! network call drops that call and reports the operation as cancelled.

use tokio::sync::watch;

/// Caller-side half of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation. Idempotent, and a no-op once the operation has
    /// already completed.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Operation-side half of a cancellation pair.
#[derive(Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Creates a connected handle/token pair.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

//! Single-shot cancellation shared by every task in a group.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// Broadcast "stop now" flag.
///
/// Clones share the same flag. Once fired it stays fired; every waiter,
/// including ones that start waiting after the fact, observes it.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes once the signal has fired.
    ///
    /// The future owns its own handle, so it can be moved into spawned tasks
    /// and never resolves spuriously.
    pub fn fired(&self) -> impl Future<Output = ()> + Send + 'static {
        let tx = Arc::clone(&self.tx);
        async move {
            let mut rx = tx.subscribe();
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    /// Number of tasks currently waiting on the signal.
    pub fn waiter_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

//! Cooperative cancellation signals
//!
//! A cancellation is a one-shot broadcast: the holder of the [`CancelHandle`]
//! fires it once and every [`CancelToken`] clone observes it. Dropping the
//! handle counts as cancellation, so an aborted caller cannot leave
//! registration tasks running forever.

use tokio::sync::watch;

/// Create a connected handle/token pair.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Fires the cancellation. Held by whoever decides when work stops.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal all tokens. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observes the cancellation. Cheap to clone; one clone per task.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Resolve once the signal fires (or the handle is dropped).
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_reaches_all_tokens() {
        let (handle, token) = cancellation();
        let mut a = token.clone();
        let mut b = token;

        assert!(!a.is_cancelled());
        handle.cancel();
        a.cancelled().await;
        b.cancelled().await;
        assert!(a.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_handle_cancels() {
        let (handle, mut token) = cancellation();
        drop(handle);
        token.cancelled().await;
        assert!(token.is_cancelled());
    }
}

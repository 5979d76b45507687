//! Cooperative shutdown signalling.
//!
//! A watch channel carries a single boolean flag; every task holds a receiver
//! and checks it at its suspension points. The flag only ever transitions
//! from `false` to `true`.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<bool>;

impl ShutdownTx {
    /// Signals shutdown to every receiver.
    pub fn shutdown(&self) {
        // Receivers having already dropped is fine during teardown.
        let _ = self.0.send(true);
    }

    /// Creates a fresh receiver for another task.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Creates a new shutdown channel pair.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), rx)
}

/// Waits until shutdown has been signalled.
///
/// Also resolves when the sender is dropped, which counts as shutdown.
pub async fn shutdown_requested(rx: &mut ShutdownRx) {
    let _ = rx.wait_for(|triggered| *triggered).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_reaches_all_subscribers() {
        let (tx, mut rx1) = create_shutdown_channel();
        let mut rx2 = tx.subscribe();

        assert!(!*rx1.borrow());
        tx.shutdown();

        shutdown_requested(&mut rx1).await;
        shutdown_requested(&mut rx2).await;
    }

    #[tokio::test]
    async fn dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        drop(tx);

        shutdown_requested(&mut rx).await;
    }
}

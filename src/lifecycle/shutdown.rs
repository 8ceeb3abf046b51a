//! Shutdown fan-out.
//!
//! The HTTP server and the key reload task each hold a receiver; one
//! `trigger` stops both.

use tokio::sync::broadcast;

/// Broadcasts a single stop signal to every long-running task.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Receiver for one task. Subscribe before calling `trigger`.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signal every subscriber. A no-op when nobody is listening.
    pub fn trigger(&self) {
        if self.tx.send(()).is_err() {
            tracing::debug!("Shutdown triggered with no running tasks");
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

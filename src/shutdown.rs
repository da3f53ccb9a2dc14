//! Process-wide shutdown signalling.
//!
//! A single [`Shutdown`] handle is owned by `main`; every long-running task
//! (HTTP server, health checker, telemetry refresher) holds a cloned
//! [`ShutdownSignal`] and exits its loop once the signal fires.

use tokio::sync::watch;

/// Sending half of the shutdown channel.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Receiving half of the shutdown channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownSignal { rx })
    }

    /// Signal all subscribers to stop.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered. Dropping the [`Shutdown`]
    /// handle without triggering counts as shutdown too.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_on_trigger() {
        let (shutdown, mut signal) = Shutdown::new();
        assert!(!signal.is_triggered());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .expect("wait should resolve after trigger");
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_sender_drop() {
        let (shutdown, mut signal) = Shutdown::new();
        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .expect("wait should resolve once the sender is gone");
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_trigger() {
        let (shutdown, _signal) = Shutdown::new();
        shutdown.trigger();

        let mut late = shutdown.subscribe();
        assert!(late.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), late.wait())
            .await
            .expect("late subscriber should observe the trigger");
    }
}

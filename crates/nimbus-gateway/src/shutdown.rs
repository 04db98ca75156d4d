//! Stopping the gateway from OS signals or from code
//!
//! [`crate::Gateway::serve`] stops accepting once the signal fires, closes
//! pushed WebSocket connections and shuts the supervisor down.

use nimbus_core::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

/// Cloneable stop switch shared by the accept loop and open connections
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<broadcast::Sender<()>>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Switch that has not fired yet
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender: Arc::new(sender),
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Receiver woken when the gateway is told to stop
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Tell the gateway to stop; later calls only wake new receivers
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            tracing::info!("Gateway shutdown requested");
        }
        // no receivers left is fine
        let _ = self.sender.send(());
    }

    /// Whether the gateway was told to stop, even before anyone subscribed
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns SIGINT/SIGTERM into a [`ShutdownSignal`] trigger
#[derive(Debug)]
pub struct SignalHandler {
    signal: ShutdownSignal,
}

impl SignalHandler {
    pub fn new(signal: ShutdownSignal) -> Self {
        Self { signal }
    }

    /// Wait for SIGINT or SIGTERM (Ctrl+C elsewhere), then trigger shutdown
    pub async fn run(self) -> Result<()> {
        #[cfg(unix)]
        {
            use signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            tracing::info!("Received Ctrl+C");
        }

        self.signal.trigger();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_untriggered_switch() {
        let signal = ShutdownSignal::new();
        let _rx = signal.subscribe();
        assert!(!signal.is_triggered());
    }

    #[tokio::test]
    async fn test_every_receiver_is_woken() {
        let signal = ShutdownSignal::new();
        let mut rx1 = signal.subscribe();
        let mut rx2 = signal.subscribe();

        signal.trigger();

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_trigger_without_subscribers_is_remembered() {
        let signal = ShutdownSignal::new();
        signal.clone().trigger();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_repeated_trigger_reaches_late_receiver() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let mut late = signal.subscribe();
        signal.trigger();
        assert!(late.try_recv().is_ok());
        assert!(signal.is_triggered());
    }
}

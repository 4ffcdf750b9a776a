//! Shutdown coordination for serve mode

use std::sync::Arc;
use tokio::sync::watch;

/// Latching shutdown flag shared by the server, the signal handler and
/// anyone else who needs to stop serve mode.
///
/// Unlike a broadcast, a trigger that happens before a task starts waiting
/// is still observed.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create an untriggered signal
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Latch the signal; later calls are no-ops
    pub fn trigger(&self) {
        if self.sender.send_replace(true) {
            return;
        }
        tracing::info!("Shutdown signal triggered");
    }

    /// Whether [`trigger`](Self::trigger) was called
    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once the signal is triggered
    pub async fn wait(&self) {
        let mut rx = self.sender.subscribe();
        // The sender lives in self, so the channel cannot close while waiting
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Triggers a [`ShutdownSignal`] on SIGINT/SIGTERM (Ctrl+C off unix)
#[derive(Debug)]
pub struct SignalHandler {
    signal: ShutdownSignal,
}

impl SignalHandler {
    /// Create a handler for `signal`
    pub fn new(signal: ShutdownSignal) -> Self {
        Self { signal }
    }

    /// Wait for the first OS signal, or for someone else to trigger the
    /// shutdown, whichever comes first
    pub async fn run(self) {
        tokio::select! {
            name = os_signal() => {
                if let Some(name) = name {
                    tracing::info!(signal = name, "Received signal");
                    self.signal.trigger();
                }
            }
            _ = self.signal.wait() => {}
        }
    }
}

#[cfg(unix)]
async fn os_signal() -> Option<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(err), _) | (_, Err(err)) => {
            tracing::error!("Failed to install signal handlers: {}", err);
            return None;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => Some("SIGTERM"),
        _ = sigint.recv() => Some("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn os_signal() -> Option<&'static str> {
    match tokio::signal::ctrl_c().await {
        Ok(()) => Some("ctrl-c"),
        Err(err) => {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_is_latched() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());

        // A waiter that arrives late still returns
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let signal = ShutdownSignal::default();
        let clone = signal.clone();

        let waiter = tokio::spawn(async move { clone.wait().await });
        signal.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_handler_returns_when_triggered_elsewhere() {
        let signal = ShutdownSignal::new();
        let handler = tokio::spawn(SignalHandler::new(signal.clone()).run());

        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), handler)
            .await
            .unwrap()
            .unwrap();
    }
}

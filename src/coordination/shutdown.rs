//! Graceful Shutdown Handler
//!
//! Coordinates the stop sequence: the worker finishes draining its
//! in-flight units, snapshot tasks and the HTTP surface exit, then the
//! process leaves. Duplicate signals are ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shutdown coordinator shared across the worker, scheduler and API tasks
pub struct Shutdown {
    requested: AtomicBool,
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            requested: AtomicBool::new(false),
            tx,
            rx,
        }
    }

    /// Get a receiver tasks can select on
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Check if shutdown has been requested
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Request shutdown. Idempotent; later calls are ignored.
    pub fn request(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal");
            return;
        }

        info!("Shutdown requested");
        let _ = self.tx.send(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers that request shutdown
pub async fn install_signal_handlers(shutdown: Arc<Shutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let shutdown_sigterm = shutdown.clone();
        let shutdown_sigint = shutdown;

        tokio::spawn(async move {
            let mut stream =
                signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
            stream.recv().await;
            info!("Received SIGTERM");
            shutdown_sigterm.request();
        });

        tokio::spawn(async move {
            let mut stream =
                signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
            stream.recv().await;
            info!("Received SIGINT");
            shutdown_sigint.request();
        });
    }

    #[cfg(windows)]
    {
        tokio::spawn(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
            info!("Received Ctrl+C");
            shutdown.request();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_request() {
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();

        assert!(!shutdown.is_requested());
        assert!(!*rx.borrow());

        shutdown.request();
        assert!(shutdown.is_requested());
        assert!(*rx.borrow());

        // Duplicate request is a no-op
        shutdown.request();
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_subscribers_observe_signal() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();

        let waiter = tokio::spawn(async move {
            rx.changed().await.expect("sender alive");
            *rx.borrow()
        });

        shutdown.request();
        assert!(waiter.await.expect("task joins"));
    }
}

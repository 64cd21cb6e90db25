//! Shutdown handling.
//!
//! A single [`ShutdownHandle`] is the stop path for every pipeline task:
//! schedulers, consumers and the sender all race their waits against
//! [`ShutdownHandle::cancelled`]. [`SignalHandler`] connects the handle to
//! SIGTERM/SIGINT for the daemon.

use std::io;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// Listens for process signals and flips the shared shutdown flag.
pub struct SignalHandler {
    handle: ShutdownHandle,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHandler {
    /// Creates a new signal handler.
    pub fn new() -> Self {
        Self {
            handle: ShutdownHandle::new(),
        }
    }

    /// Installs the signal handlers and spawns the listener task.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn spawn_listener(&self) -> io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let handle = self.handle.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
                _ = sigint.recv() => info!("received SIGINT, initiating shutdown"),
                _ = handle.cancelled() => {}
            }
            handle.trigger();
            debug!("signal listener stopped");
        });
        Ok(())
    }

    /// Non-Unix implementation: only Ctrl+C.
    #[cfg(not(unix))]
    pub fn spawn_listener(&self) -> io::Result<()> {
        let handle = self.handle.clone();

        tokio::spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if res.is_ok() {
                        info!("received Ctrl+C, initiating shutdown");
                    }
                }
                _ = handle.cancelled() => {}
            }
            handle.trigger();
        });
        Ok(())
    }

    /// Returns true if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        self.handle.is_shutdown()
    }

    /// Programmatically triggers a shutdown.
    pub fn trigger_shutdown(&self) {
        self.handle.trigger();
    }

    /// Creates a shutdown handle that can be passed to other components.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }
}

/// A signal that completes when shutdown is signaled.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Waits for the shutdown signal.
    pub async fn wait(mut self) {
        // The sender lives as long as any handle, so an error here means
        // every handle is gone and nobody can trigger anymore.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// A handle for triggering or observing shutdown.
///
/// Clones share the same flag. Once triggered it stays triggered.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    /// Creates an untriggered handle not tied to any process signal.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Triggers a shutdown.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns a future that completes when shutdown is triggered.
    pub fn wait(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.rx.clone(),
        }
    }

    /// Completes when shutdown is triggered, immediately if it already was.
    pub async fn cancelled(&self) {
        self.wait().wait().await;
    }
}

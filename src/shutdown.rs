//! Cooperative shutdown.
//!
//! A [`ShutdownCoordinator`] is created by the binary and handed explicitly to
//! whatever needs to stop early. A running transfer checks it between batches
//! and pauses its operation, leaving progress and checkpoints consistent for
//! a later resume.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// One-shot stop flag with async waiters.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no stop requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request a stop. Waiters are woken on the first request only.
    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether a stop has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once a stop is requested.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent request is not missed.
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// Request shutdown on `coordinator` when Ctrl+C arrives.
pub fn listen_for_ctrl_c(coordinator: SharedShutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, pausing after the current batch");
            coordinator.request_shutdown();
        }
    })
}

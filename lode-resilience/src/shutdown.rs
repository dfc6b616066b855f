//! Process shutdown coordination
//!
//! The coordinator owns the process-level cancellation token. Everything
//! that must stop when the process stops holds a clone or a child of it;
//! OS signals, the health checker and explicit requests all cancel it.

use log::{info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shutdown errors
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("Shutdown completed with {0} tasks still active")]
    TasksRemaining(u32),
}

/// Decrements the active task count when dropped
pub struct TaskGuard {
    active: Arc<AtomicU32>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ShutdownCoordinator {
    token: CancellationToken,
    reason: Mutex<Option<String>>,
    active_tasks: Arc<AtomicU32>,
    graceful_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator with a 30 second drain timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(graceful_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Mutex::new(None),
            active_tasks: Arc::new(AtomicU32::new(0)),
            graceful_timeout,
        }
    }

    /// The process-level token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled with the process but cancellable on its own
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Why shutdown was requested, if it was requested through [`Self::shutdown`]
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Request shutdown, returns false if it was already requested
    pub fn shutdown(&self, reason: impl Into<String>) -> bool {
        let mut current = self.reason.lock();
        if self.token.is_cancelled() {
            return false;
        }

        let reason = reason.into();
        info!("Shutdown requested: {}", reason);
        *current = Some(reason);
        self.token.cancel();
        true
    }

    /// Register a task that should finish before the process exits
    pub fn task_started(&self) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            active: self.active_tasks.clone(),
        }
    }

    pub fn active_task_count(&self) -> u32 {
        self.active_tasks.load(Ordering::SeqCst)
    }

    /// Wait for registered tasks to drop their guards
    pub async fn wait_for_tasks(&self) -> Result<(), ShutdownError> {
        let deadline = tokio::time::Instant::now() + self.graceful_timeout;

        while tokio::time::Instant::now() < deadline {
            if self.active_task_count() == 0 {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        match self.active_task_count() {
            0 => Ok(()),
            remaining => {
                warn!("Shutdown timeout with {} tasks still active", remaining);
                Err(ShutdownError::TasksRemaining(remaining))
            }
        }
    }

    /// Cancel the process token on Ctrl-C or SIGTERM
    pub fn listen_for_signals(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = coordinator.token.cancelled() => {}
                signal = wait_for_signal() => {
                    coordinator.shutdown(format!("received {}", signal));
                }
            }
        })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C"
}

//! Escalating periodic health checks
//!
//! A [`HealthChecker`] polls a boolean predicate. Each failed check halves
//! the wait before the next one and counts against a retry limit; when the
//! limit is exceeded the checker stops and cancels the owner's fatal token.
//! A passing check resets the count and, optionally, the interval.

use async_trait::async_trait;
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A readiness predicate polled by a [`HealthChecker`]
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    async fn check(&self) -> bool;
}

#[async_trait]
impl<F, Fut> HealthCheck for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn check(&self) -> bool {
        (self)().await
    }
}

/// Health checker tuning
#[derive(Debug, Clone)]
pub struct HealthCheckerOptions {
    /// Wait between checks while healthy
    pub interval: Duration,
    /// Failed checks tolerated before the fatal token is cancelled
    pub retry_limit: u32,
    /// Return to `interval` after a passing check
    pub restore_interval: bool,
}

impl Default for HealthCheckerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            retry_limit: 3,
            restore_interval: true,
        }
    }
}

/// Point-in-time view of a checker's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Checks performed so far
    pub checks: u64,
    /// Escalation counter, 1 while healthy
    pub failures_count: u32,
    /// Warnings logged so far
    pub warnings: u32,
    /// Whether the fatal token has been cancelled by this checker
    pub tripped: bool,
    /// Wait before the next check
    pub current_interval: Duration,
}

struct Running {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Generic escalating health checker
pub struct HealthChecker {
    name: String,
    check: Arc<dyn HealthCheck>,
    options: HealthCheckerOptions,
    fatal: CancellationToken,
    state: Arc<Mutex<HealthSnapshot>>,
    running: Mutex<Option<Running>>,
}

impl HealthChecker {
    pub fn new(
        name: impl Into<String>,
        check: impl HealthCheck,
        options: HealthCheckerOptions,
        fatal: CancellationToken,
    ) -> Self {
        let state = HealthSnapshot {
            checks: 0,
            failures_count: 1,
            warnings: 0,
            tripped: false,
            current_interval: options.interval,
        };

        Self {
            name: name.into(),
            check: Arc::new(check),
            options,
            fatal,
            state: Arc::new(Mutex::new(state)),
            running: Mutex::new(None),
        }
    }

    /// Begin polling; calling it while already running does nothing
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let stop = CancellationToken::new();
        let handle = tokio::spawn(run_checks(
            self.name.clone(),
            self.check.clone(),
            self.options.clone(),
            self.fatal.clone(),
            self.state.clone(),
            stop.clone(),
        ));

        debug!("{} health checker started", self.name);
        *running = Some(Running { stop, handle });
    }

    /// Stop polling; safe to call when not running
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.stop.cancel();
            debug!("{} health checker stopped", self.name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        *self.state.lock()
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_checks(
    name: String,
    check: Arc<dyn HealthCheck>,
    options: HealthCheckerOptions,
    fatal: CancellationToken,
    state: Arc<Mutex<HealthSnapshot>>,
    stop: CancellationToken,
) {
    let mut interval = options.interval;
    let mut failures_count: u32 = 1;

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = fatal.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let healthy = check.check().await;

        if healthy {
            failures_count = 1;
            if options.restore_interval {
                interval = options.interval;
            }
        } else if failures_count <= options.retry_limit {
            interval /= 2;
            warn!(
                "{} check failed ({}/{}), next check in {:?}",
                name, failures_count, options.retry_limit, interval
            );
            failures_count += 1;
            state.lock().warnings += 1;
        }

        let tripped = failures_count > options.retry_limit;
        {
            let mut snapshot = state.lock();
            snapshot.checks += 1;
            snapshot.failures_count = failures_count;
            snapshot.current_interval = interval;
            snapshot.tripped = tripped;
        }

        if tripped {
            error!(
                "{} check failed {} times, cancelling",
                name, options.retry_limit
            );
            fatal.cancel();
            return;
        }
    }
}

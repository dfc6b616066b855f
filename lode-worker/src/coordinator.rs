//! Test run assignment and lifecycle
//!
//! The coordinator turns TestRun changes into engine runs for this worker.
//! Runs assigned here are kept pending until the worker is `Ready` and the
//! run's scheduled start falls inside the scheduling window; then exactly
//! one of them executes at a time. The outcome is appended to the run with
//! an etag-checked read-modify-write, so results from several workers
//! never overwrite each other and replayed changes never add a second one.

use async_trait::async_trait;
use chrono::Utc;
use lode_changefeed::ChangeHandler;
use lode_config::WorkerConfig;
use lode_core::constants::{
    CANCELLATION_MARKER, CLIENT_READY, EXECUTING_TEST_RUN, HARD_STOP_MARKER, RECEIVED_NEW_TEST_RUN,
};
use lode_core::{AppendOutcome, ClientStatus, ClientStatusType, LoadResult, TestRun};
use lode_engine::{LoadRunner, RunSummary};
use lode_resilience::{RetryExecutor, RetryPolicy};
use lode_storage::{StorageError, TestRunService};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::WorkerResult;
use crate::liveness::LivenessTracker;

struct ActiveRun {
    id: String,
    cancel: CancellationToken,
    hard_stop: bool,
}

#[derive(Default)]
struct Assignments {
    pending: HashMap<String, TestRun>,
    active: Option<ActiveRun>,
    finished: HashSet<String>,
}

struct Inner {
    liveness: Arc<LivenessTracker>,
    test_runs: TestRunService,
    runner: Arc<dyn LoadRunner>,
    scheduling_window: Duration,
    append_policy: RetryPolicy,
    shutdown: CancellationToken,
    state: Mutex<Assignments>,
    execution: Mutex<Option<JoinHandle<()>>>,
}

/// Bridges TestRun changes to [`LoadRunner`] executions
#[derive(Clone)]
pub struct AssignmentCoordinator {
    inner: Arc<Inner>,
}

impl AssignmentCoordinator {
    pub fn new(
        liveness: Arc<LivenessTracker>,
        test_runs: TestRunService,
        runner: Arc<dyn LoadRunner>,
        config: &WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                liveness,
                test_runs,
                runner,
                scheduling_window: config.scheduling_window,
                append_policy: RetryPolicy::optimistic(
                    config.result_append_attempts,
                    config.result_append_delay,
                ),
                shutdown,
                state: Mutex::new(Assignments::default()),
                execution: Mutex::new(None),
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        self.inner.liveness.client_id()
    }

    /// Id of the run currently executing
    pub fn active_run(&self) -> Option<String> {
        self.inner.state.lock().active.as_ref().map(|a| a.id.clone())
    }

    /// Ids of runs waiting for this worker, sorted
    pub fn pending_runs(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.state.lock().pending.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn has_finished(&self, test_run_id: &str) -> bool {
        self.inner.state.lock().finished.contains(test_run_id)
    }

    /// Number of finished run ids still remembered
    pub fn finished_len(&self) -> usize {
        self.inner.state.lock().finished.len()
    }

    /// Re-read this worker's open runs from the store
    ///
    /// Catches runs whose change was missed or that were scheduled too far
    /// ahead when they arrived.
    pub async fn poll(&self) -> WorkerResult<usize> {
        let runs = self
            .inner
            .test_runs
            .get_new_test_runs_by_load_client_id(self.client_id())
            .await?;

        for run in &runs {
            self.ingest(run);
        }
        {
            // Finished runs that are no longer open for this worker cannot come back
            let open: HashSet<&str> = runs.iter().map(|run| run.base.id.as_str()).collect();
            let mut state = self.inner.state.lock();
            let active = state.active.as_ref().map(|a| a.id.clone());
            state
                .finished
                .retain(|id| open.contains(id.as_str()) || active.as_deref() == Some(id.as_str()));
        }
        self.evaluate();
        Ok(runs.len())
    }

    /// Start the next eligible pending run if the worker is free
    pub fn evaluate(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        if self.inner.liveness.current() != ClientStatusType::Ready {
            return;
        }

        let window = chrono::Duration::from_std(self.inner.scheduling_window)
            .unwrap_or(chrono::Duration::zero());
        let horizon = Utc::now() + window;

        let mut state = self.inner.state.lock();
        if state.active.is_some() {
            return;
        }

        let next = state
            .pending
            .values()
            .filter(|run| run.start_time <= horizon)
            .min_by_key(|run| run.start_time)
            .map(|run| run.base.id.clone());
        let Some(run) = next.and_then(|id| state.pending.remove(&id)) else {
            return;
        };

        let cancel = self.inner.shutdown.child_token();
        state.active = Some(ActiveRun {
            id: run.base.id.clone(),
            cancel: cancel.clone(),
            hard_stop: run.hard_stop,
        });

        let span = info_span!("test_run", test_run_id = %run.base.id);
        let coordinator = self.clone();
        let handle = tokio::spawn(async move { coordinator.execute(run, cancel).instrument(span).await });
        *self.inner.execution.lock() = Some(handle);
    }

    /// Wait until no run is executing
    pub async fn wait_idle(&self) {
        loop {
            let handle = self.inner.execution.lock().take();
            match handle {
                Some(handle) => {
                    if let Err(e) = handle.await {
                        error!("TestRun execution panicked: {}", e);
                        self.inner.state.lock().active = None;
                    }
                }
                None => break,
            }
        }
    }

    fn ingest(&self, run: &TestRun) {
        let client_id = self.client_id();
        if !run.is_assigned_to(client_id) {
            return;
        }

        let id = &run.base.id;
        let mut state = self.inner.state.lock();

        if let Some(active) = state.active.as_mut().filter(|a| a.id == *id) {
            if run.hard_stop && !active.hard_stop {
                info!(test_run_id = %id, "HardStop requested, cancelling TestRun");
                active.hard_stop = true;
                active.cancel.cancel();
            }
            return;
        }

        // The stored run now records the outcome, so the id need not be kept
        if run.result_for(client_id).is_some() || run.is_completed() {
            state.pending.remove(id);
            state.finished.remove(id);
            debug!(test_run_id = %id, "TestRun already handled");
            return;
        }
        if state.finished.contains(id) {
            debug!(test_run_id = %id, "TestRun already handled");
            return;
        }

        if state.pending.insert(id.clone(), run.clone()).is_none() {
            info!(
                test_run_id = %id,
                start_time = %run.start_time,
                "{}",
                RECEIVED_NEW_TEST_RUN
            );
        }
    }

    fn hard_stop_requested(&self, test_run_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .is_some_and(|a| a.id == test_run_id && a.hard_stop)
    }

    async fn execute(&self, run: TestRun, cancel: CancellationToken) {
        let inner = &self.inner;
        let run_id = run.base.id.clone();
        let client = inner.liveness.load_client().clone();
        let started = Utc::now();

        // The delivered change may be stale
        let run = match inner.test_runs.get(&run_id).await {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                warn!("TestRun no longer exists");
                self.finish(&run_id).await;
                return;
            }
            Err(e) => {
                warn!("Could not re-read TestRun, using the delivered version: {}", e);
                run
            }
        };
        if run.result_for(self.client_id()).is_some() {
            debug!("LoadResult was already recorded");
            self.finish(&run_id).await;
            return;
        }

        let result = if run.hard_stop {
            info!("TestRun was stopped before it started");
            RunSummary::empty(started)
                .into_load_result(client)
                .with_error(HARD_STOP_MARKER)
        } else {
            if let Err(e) = inner
                .liveness
                .set_status(ClientStatusType::Testing, EXECUTING_TEST_RUN)
                .await
            {
                warn!("Could not record Testing status: {}", e);
            }

            match inner.runner.run(&run.load_test_config, cancel).await {
                Ok(summary) => {
                    let marker = match (summary.cancelled, self.hard_stop_requested(&run_id)) {
                        (true, true) => Some(HARD_STOP_MARKER),
                        (true, false) => Some(CANCELLATION_MARKER),
                        (false, _) => None,
                    };
                    let result = summary.into_load_result(client);
                    match marker {
                        Some(marker) => result.with_error(marker),
                        None => result,
                    }
                }
                Err(e) => {
                    error!("TestRun could not be executed: {}", e);
                    RunSummary::empty(started)
                        .into_load_result(client)
                        .with_error(e.to_string())
                }
            }
        };

        info!(
            total = result.total_requests,
            successful = result.successful_requests,
            failed = result.failed_requests,
            error_message = result.error_message.as_deref(),
            "TestRun execution finished"
        );

        match self.report(&run_id, result).await {
            Ok(Some(AppendOutcome::Appended { completed })) => {
                info!(completed, "LoadResult recorded");
            }
            Ok(Some(AppendOutcome::AlreadyPresent)) => debug!("LoadResult was already recorded"),
            Ok(None) => warn!("TestRun no longer exists, LoadResult dropped"),
            Err(e) => error!("Failed to record LoadResult: {}", e),
        }

        self.finish(&run_id).await;
    }

    /// Append `result` to the stored run, re-reading on etag conflicts
    async fn report(&self, run_id: &str, result: LoadResult) -> WorkerResult<Option<AppendOutcome>> {
        let test_runs = &self.inner.test_runs;
        let result = &result;
        let executor = RetryExecutor::new(self.inner.append_policy.clone());

        let outcome = executor
            .execute(move || async move {
                let Some((mut run, etag)) = test_runs.get_with_etag(run_id).await? else {
                    return Ok(None);
                };

                let stamped = run.stamp_hard_stop(Utc::now());
                let outcome = run.append_result(result.clone())?;
                if outcome == AppendOutcome::AlreadyPresent && !stamped {
                    return Ok(Some(outcome));
                }

                test_runs.replace_if_match(&run, &etag).await?;
                Ok::<_, StorageError>(Some(outcome))
            })
            .await
            .map_err(|e| e.into_inner())?;

        Ok(outcome)
    }

    async fn finish(&self, run_id: &str) {
        {
            let mut state = self.inner.state.lock();
            state.active = None;
            state.finished.insert(run_id.to_string());
        }

        let liveness = &self.inner.liveness;
        if !self.inner.shutdown.is_cancelled() && liveness.current() == ClientStatusType::Testing {
            if let Err(e) = liveness.set_status(ClientStatusType::Ready, CLIENT_READY).await {
                warn!("Could not record Ready status: {}", e);
            }
        }

        self.evaluate();
    }
}

#[async_trait]
impl ChangeHandler for AssignmentCoordinator {
    async fn on_client_status(&self, status: &ClientStatus) -> anyhow::Result<()> {
        if status.client_id() == self.client_id() {
            self.evaluate();
        }
        Ok(())
    }

    async fn on_test_run(&self, run: &TestRun) -> anyhow::Result<()> {
        self.ingest(run);
        self.evaluate();
        Ok(())
    }
}

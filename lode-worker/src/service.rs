//! Worker composition root

use lode_changefeed::ChangeDispatcher;
use lode_config::LodeConfig;
use lode_core::constants::{CLIENT_READY, INITIALIZING_CLIENT, TERMINATING_CLIENT};
use lode_core::{ClientStatusType, LoadClient};
use lode_engine::{ClientContext, HttpLoadRunner, LoadRunner};
use lode_resilience::{HealthChecker, HealthCheckerOptions, ShutdownCoordinator};
use lode_storage::{ClientStatusService, DocumentStore, TestRunService};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::coordinator::AssignmentCoordinator;
use crate::error::{WorkerError, WorkerResult};
use crate::liveness::LivenessTracker;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Poller {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// One load-generating worker process
///
/// Owns everything the worker runs: its status record, the assignment
/// coordinator, the change dispatcher feeding it and the store health
/// check. The shared [`ShutdownCoordinator`] token ends the worker; the
/// health check and repeated status write failures cancel it too.
pub struct WorkerService {
    config: LodeConfig,
    store: Arc<dyn DocumentStore>,
    shutdown: Arc<ShutdownCoordinator>,
    liveness: Arc<LivenessTracker>,
    coordinator: AssignmentCoordinator,
    dispatcher: ChangeDispatcher,
    health: HealthChecker,
    poller: Mutex<Option<Poller>>,
    stopped: AtomicBool,
}

impl WorkerService {
    pub fn new(
        config: LodeConfig,
        store: Arc<dyn DocumentStore>,
        runner: Arc<dyn LoadRunner>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self::with_load_client(config.clone(), store, runner, shutdown, load_client(&config))
    }

    /// Worker sending real HTTP traffic
    pub fn with_http_runner(
        config: LodeConfig,
        store: Arc<dyn DocumentStore>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        let client = load_client(&config);
        let context = ClientContext {
            load_client_id: client.base.id.clone(),
            zone: client.zone.clone(),
            region: client.region.clone(),
        };
        if config.worker.prometheus {
            debug!("Prometheus flag set, no metrics sink is attached");
        }

        let runner = Arc::new(HttpLoadRunner::new(config.engine.clone(), context));
        Self::with_load_client(config, store, runner, shutdown, client)
    }

    /// Worker reporting as `client`, with any runner
    pub fn with_load_client(
        config: LodeConfig,
        store: Arc<dyn DocumentStore>,
        runner: Arc<dyn LoadRunner>,
        shutdown: Arc<ShutdownCoordinator>,
        client: LoadClient,
    ) -> Self {
        let fatal = shutdown.token();
        let client_id = client.base.id.clone();

        let liveness = Arc::new(LivenessTracker::new(
            ClientStatusService::new(store.clone()),
            client,
            &config.worker,
            fatal.clone(),
        ));

        let coordinator = AssignmentCoordinator::new(
            liveness.clone(),
            TestRunService::new(store.clone()),
            runner,
            &config.worker,
            fatal.clone(),
        );

        // Every worker must see every TestRun change, so each one consumes
        // the feed under its own lease group unless configured otherwise
        let mut feed_config = config.changefeed.clone();
        if feed_config.processor_name.is_empty() {
            feed_config.processor_name = client_id.clone();
        }
        let dispatcher = ChangeDispatcher::new(client_id, feed_config);

        let probe = store.clone();
        let health = HealthChecker::new(
            "store",
            move || {
                let store = probe.clone();
                async move { store.ping().await }
            },
            HealthCheckerOptions {
                interval: config.health.interval,
                retry_limit: config.health.retry_limit,
                restore_interval: config.health.restore_interval,
            },
            fatal,
        );

        Self {
            config,
            store,
            shutdown,
            liveness,
            coordinator,
            dispatcher,
            health,
            poller: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn client_id(&self) -> &str {
        self.liveness.client_id()
    }

    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        &self.liveness
    }

    pub fn coordinator(&self) -> &AssignmentCoordinator {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &ChangeDispatcher {
        &self.dispatcher
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    /// Bring the worker to `Ready`
    ///
    /// Failing to reach the store or to start the change feed is fatal:
    /// the process token is cancelled and the error returned.
    pub async fn start(&self) -> WorkerResult<()> {
        if self.shutdown.is_shutting_down() {
            return Err(WorkerError::ShuttingDown);
        }

        info!(client_id = %self.client_id(), "{}", INITIALIZING_CLIENT);
        if let Err(e) = self.liveness.set_message(INITIALIZING_CLIENT).await {
            self.shutdown.shutdown(format!("cannot write client status: {}", e));
            return Err(e);
        }

        let feed = match self.store.open_change_feed().await {
            Ok(feed) => feed,
            Err(e) => {
                self.shutdown.shutdown(format!("cannot open change feed: {}", e));
                return Err(e.into());
            }
        };

        let coordinator = self.coordinator.clone();
        let started = self
            .dispatcher
            .start(feed, move |registry| registry.register(Arc::new(coordinator)))
            .await;
        if let Err(e) = started {
            error!("Change dispatcher failed to start: {}", e);
            self.shutdown.shutdown(format!("change dispatcher failed to start: {}", e));
            return Err(e.into());
        }

        self.liveness
            .set_status(ClientStatusType::Ready, CLIENT_READY)
            .await?;

        self.liveness
            .start_refresh(self.config.worker.status_update_interval);
        if self.config.health.enabled {
            self.health.start();
        }
        self.start_poller();

        info!(client_id = %self.client_id(), "{}", CLIENT_READY);
        Ok(())
    }

    /// Start, then serve until the process token is cancelled
    pub async fn run(&self) -> WorkerResult<()> {
        let client = self.liveness.load_client();
        let span = lode_logging::worker_span(&client.base.id, &client.region, &client.zone);

        async {
            if let Err(e) = self.start().await {
                self.stop().await;
                return Err(e);
            }

            self.shutdown.token().cancelled().await;
            self.stop().await;
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Tear the worker down
    ///
    /// Requests process shutdown, lets the active run report its result,
    /// then records `Terminating` and stops every background task. Safe to
    /// call more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(client_id = %self.client_id(), "{}", TERMINATING_CLIENT);
        self.shutdown.shutdown("worker stopped");

        self.stop_poller().await;
        self.coordinator.wait_idle().await;
        self.liveness.stop_refresh().await;

        if let Err(e) = self.liveness.terminate().await {
            warn!("Could not record Terminating status: {}", e);
        }

        self.dispatcher.stop().await;
        self.health.stop();
        info!(client_id = %self.client_id(), "Worker stopped");
    }

    fn start_poller(&self) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return;
        }

        let stop = self.shutdown.child_token();
        let token = stop.clone();
        let coordinator = self.coordinator.clone();
        let every = self.config.worker.polling_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match coordinator.poll().await {
                            Ok(found) => debug!("Poll found {} open TestRuns", found),
                            Err(e) => warn!("TestRun poll failed: {}", e),
                        }
                    }
                }
            }
        });

        *poller = Some(Poller { stop, handle });
    }

    async fn stop_poller(&self) {
        let Some(poller) = self.poller.lock().take() else {
            return;
        };

        poller.stop.cancel();
        if timeout(STOP_TIMEOUT, poller.handle).await.is_err() {
            warn!("TestRun poller did not stop in time");
        }
    }
}

/// LoadClient snapshot describing this process
fn load_client(config: &LodeConfig) -> LoadClient {
    let mut client = LoadClient::new(config.worker.startup_args.clone())
        .with_location(config.worker.region.clone(), config.worker.zone.clone());
    client.prometheus = config.worker.prometheus;
    client
}

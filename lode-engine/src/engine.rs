//! Request execution in run-once and run-loop mode

use chrono::Utc;
use lode_core::LoadTestConfig;
use lode_http::{validate_response, RequestDefinition, Transport, ValidationResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::metrics::{request_mode, status_category, MetricLabels, MetricsSink};
use crate::perf::{PerfLog, PerfTargets};
use crate::summary::RunSummary;

/// Identity of the worker issuing requests, stamped on logs and metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub load_client_id: String,
    pub zone: String,
    pub region: String,
}

struct EngineInner {
    transport: Arc<dyn Transport>,
    requests: Vec<RequestDefinition>,
    targets: PerfTargets,
    metrics: Option<Arc<dyn MetricsSink>>,
    client: ClientContext,
}

/// Drives the requests of one load test
#[derive(Clone)]
pub struct LoadEngine {
    inner: Arc<EngineInner>,
}

/// Request/error tallies of one server
#[derive(Debug, Default, Clone, Copy)]
struct ServerCounters {
    requests: u64,
    errors: u64,
    validation_failures: u64,
}

impl ServerCounters {
    fn record(&mut self, log: &PerfLog) {
        self.requests += 1;
        if log.failed {
            self.errors += 1;
        } else if !log.validated {
            self.validation_failures += 1;
        }
    }

    fn failures(&self) -> u64 {
        self.errors + self.validation_failures
    }
}

impl LoadEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        requests: Vec<RequestDefinition>,
        targets: PerfTargets,
        client: ClientContext,
    ) -> EngineResult<Self> {
        if requests.is_empty() {
            return Err(EngineError::InvalidConfig("request list is empty".to_string()));
        }

        Ok(Self {
            inner: Arc::new(EngineInner {
                transport,
                requests,
                targets,
                metrics: None,
                client,
            }),
        })
    }

    /// Attach a metrics sink; must be called before the engine is cloned
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.metrics = Some(metrics);
        } else {
            warn!("Metrics sink ignored: engine is already shared");
        }
        self
    }

    pub fn requests(&self) -> &[RequestDefinition] {
        &self.inner.requests
    }

    /// Run `config` to completion or until `cancel` fires
    ///
    /// Honours `delay_start` and `dry_run`, then dispatches on `run_loop`.
    pub async fn run(&self, config: &LoadTestConfig, cancel: CancellationToken) -> RunSummary {
        let start_time = Utc::now();
        self.log_startup(config);

        if config.delay_start > 0 {
            info!(delay_start = config.delay_start, "Delaying load test start");
            tokio::select! {
                _ = cancel.cancelled() => {
                    let mut summary = RunSummary::empty(start_time);
                    summary.cancelled = true;
                    return summary;
                }
                _ = sleep(Duration::from_secs(config.delay_start)) => {}
            }
        }

        if config.dry_run {
            info!("Dry run requested, no requests will be sent");
            return RunSummary::empty(start_time);
        }

        if config.run_loop {
            self.run_loop(config, cancel).await
        } else {
            self.run_once(config, cancel).await
        }
    }

    /// One sequential sweep through every request, per server
    pub async fn run_once(&self, config: &LoadTestConfig, cancel: CancellationToken) -> RunSummary {
        let start_time = Utc::now();
        let max_errors = u64::from(config.max_errors);
        let mut total_requests = 0;
        let mut total_failures = 0;

        'servers: for server in &config.server {
            let mut counters = ServerCounters::default();

            for request in &self.inner.requests {
                if cancel.is_cancelled() {
                    break 'servers;
                }
                if counters.failures() >= max_errors {
                    break;
                }

                let log = self.execute_request(server, request, config).await;
                counters.record(&log);

                if config.sleep > 0 {
                    let remaining = config.sleep.saturating_sub(log.duration_ms as u64);
                    if remaining > 0 {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = sleep(Duration::from_millis(remaining)) => {}
                        }
                    }
                }
            }

            total_requests += counters.requests;
            total_failures += counters.failures();
            self.log_server_totals(server, &counters, max_errors);
        }

        RunSummary {
            start_time,
            completed_time: Utc::now().max(start_time),
            total_requests,
            failed_requests: total_failures,
            cancelled: cancel.is_cancelled(),
        }
    }

    /// Continuous request streams, one per server
    ///
    /// Every stream ticks every `sleep` ms (at least 1 ms) and issues the
    /// next request once a slot of the shared `max_concurrent` semaphore is
    /// free, so at most that many requests are in flight across all
    /// streams. Streams stop at the duration deadline or on cancellation
    /// and wait for their in-flight requests before reporting.
    pub async fn run_loop(&self, config: &LoadTestConfig, cancel: CancellationToken) -> RunSummary {
        let start_time = Utc::now();
        let tick = Duration::from_millis(config.sleep.max(1));
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let stop = cancel.child_token();

        let mut streams = JoinSet::new();
        for server in &config.server {
            let stream = RequestStream {
                engine: self.clone(),
                config: Arc::new(config.clone()),
                server: server.clone(),
                slots: slots.clone(),
                stop: stop.clone(),
            };
            streams.spawn(stream.run(tick));
        }

        if config.duration > 0 {
            let deadline = Instant::now() + Duration::from_secs(config.duration);
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep_until(deadline) => debug!("Load test duration elapsed"),
            }
        } else {
            cancel.cancelled().await;
        }
        stop.cancel();

        let mut total_requests = 0;
        let mut total_failures = 0;
        while let Some(finished) = streams.join_next().await {
            match finished {
                Ok(counters) => {
                    total_requests += counters.requests;
                    total_failures += counters.failures();
                }
                Err(e) => error!("Request stream panicked: {}", e),
            }
        }

        RunSummary {
            start_time,
            completed_time: Utc::now().max(start_time),
            total_requests,
            failed_requests: total_failures,
            cancelled: cancel.is_cancelled(),
        }
    }

    /// Send one request, validate, classify, log and observe it
    ///
    /// Transport errors become a failed [`PerfLog`]; nothing here aborts
    /// the caller.
    pub async fn execute_request(
        &self,
        server: &str,
        request: &RequestDefinition,
        config: &LoadTestConfig,
    ) -> PerfLog {
        let date = Utc::now();
        let started = Instant::now();

        let (validation, status_code, content_length, correlation_id) =
            match self.inner.transport.send(server, request).await {
                Ok(response) => (
                    validate_response(&request.validation, &response),
                    response.status,
                    response.content_length,
                    response.correlation_id,
                ),
                Err(e) => (ValidationResult::transport_failure(e.to_string()), 500, 0, String::new()),
            };

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let category = request.category().to_string();

        let log = PerfLog {
            date,
            server: server.to_string(),
            verb: request.verb.to_string(),
            path: request.path.clone(),
            status_code,
            quartile: self.inner.targets.quartile(&category, duration_ms),
            category,
            duration_ms,
            content_length,
            correlation_id,
            failed: validation.failed,
            validated: validation.is_valid(),
            errors: validation.errors,
        };

        self.log_request(&log, config);

        if let Some(metrics) = &self.inner.metrics {
            let labels = MetricLabels {
                status_category: status_category(log.status_code),
                mode: request_mode(&log.category, &log.path),
                server: log.server.clone(),
                failed: log.failed,
                zone: self.inner.client.zone.clone(),
                region: self.inner.client.region.clone(),
            };
            metrics.record_observation(&labels, log.duration_ms);
        }

        log
    }

    fn log_request(&self, log: &PerfLog, config: &LoadTestConfig) {
        if log.category == "Ignore" {
            return;
        }

        let client = &self.inner.client;
        let error_details = if config.verbose_errors {
            log.error_details()
        } else {
            None
        };

        info!(
            target: "lode_engine::request",
            date = %log.date.to_rfc3339(),
            server = %log.server,
            status_code = log.status_code,
            verb = %log.verb,
            path = %log.path,
            errors = log.error_count(),
            duration = (log.duration_ms * 100.0).round() / 100.0,
            content_length = log.content_length,
            correlation_id = %log.correlation_id,
            quartile = log.quartile,
            category = %log.category,
            load_client_id = %client.load_client_id,
            zone = non_empty(&client.zone),
            region = non_empty(&client.region),
            tag = non_empty(&config.tag),
            error_details = error_details.as_deref(),
            "request"
        );
    }

    fn log_server_totals(&self, server: &str, counters: &ServerCounters, max_errors: u64) {
        if counters.validation_failures > 0 {
            warn!(server = %server, "Validation Errors: {}", counters.validation_failures);
        }
        if counters.errors > 0 {
            warn!(server = %server, "Failed: {} Errors", counters.errors);
        }
        if counters.failures() >= max_errors {
            warn!(
                server = %server,
                "Failed: Errors: {} >= MaxErrors: {}",
                counters.failures(),
                max_errors
            );
        }
    }

    fn log_startup(&self, config: &LoadTestConfig) {
        info!(
            event_type = "Startup",
            version = env!("CARGO_PKG_VERSION"),
            host = %config.server.join(" "),
            base_url = %config.base_url,
            files = %config.files.join(" "),
            sleep = config.sleep,
            max_concurrent = config.max_concurrent,
            duration = config.duration,
            run_loop = config.run_loop,
            random = config.randomize,
            verbose = config.verbose_errors,
            dry_run = config.dry_run,
            tag = %config.tag,
            zone = %self.inner.client.zone,
            region = %self.inner.client.region,
            "Starting load test"
        );
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.trim().is_empty()).then_some(value)
}

/// One server's request issuer in run-loop mode
struct RequestStream {
    engine: LoadEngine,
    config: Arc<LoadTestConfig>,
    server: String,
    slots: Arc<Semaphore>,
    stop: CancellationToken,
}

impl RequestStream {
    async fn run(self, tick: Duration) -> ServerCounters {
        let mut counters = ServerCounters::default();
        let mut in_flight = JoinSet::new();
        let mut next_index = 0usize;
        let request_count = self.engine.inner.requests.len();

        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                Some(done) = in_flight.join_next() => {
                    Self::harvest(&mut counters, done);
                    continue;
                }
                _ = ticker.tick() => {}
            }

            // Wait for a slot while still collecting finished requests
            let permit = loop {
                tokio::select! {
                    _ = self.stop.cancelled() => break None,
                    Some(done) = in_flight.join_next() => Self::harvest(&mut counters, done),
                    permit = self.slots.clone().acquire_owned() => break permit.ok(),
                }
            };
            let Some(permit) = permit else {
                break;
            };

            let index = if self.config.randomize {
                fastrand::usize(..request_count)
            } else {
                let index = next_index;
                next_index = (next_index + 1) % request_count;
                index
            };

            let engine = self.engine.clone();
            let config = self.config.clone();
            let server = self.server.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                let request = &engine.inner.requests[index];
                engine.execute_request(&server, request, &config).await
            });
        }

        while let Some(done) = in_flight.join_next().await {
            Self::harvest(&mut counters, done);
        }

        debug!(
            server = %self.server,
            requests = counters.requests,
            failures = counters.failures(),
            "Request stream stopped"
        );
        counters
    }

    fn harvest(counters: &mut ServerCounters, done: Result<PerfLog, tokio::task::JoinError>) {
        match done {
            Ok(log) => counters.record(&log),
            Err(e) => {
                error!("Request task panicked: {}", e);
                counters.requests += 1;
                counters.errors += 1;
            }
        }
    }
}

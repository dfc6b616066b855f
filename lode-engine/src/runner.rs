//! Entry point used by workers to execute a load test

use async_trait::async_trait;
use lode_config::EngineConfig;
use lode_core::{LoadTestConfig, Validate};
use lode_http::{load_requests, HttpConfig, ReqwestTransport, RequestSource, Transport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{ClientContext, LoadEngine};
use crate::error::{EngineError, EngineResult};
use crate::metrics::MetricsSink;
use crate::perf::PerfTargets;
use crate::summary::RunSummary;

/// Executes one load test configuration to completion
///
/// Implementations must return once `cancel` fires, with whatever was
/// counted so far and `cancelled` set.
#[async_trait]
pub trait LoadRunner: Send + Sync {
    async fn run(&self, config: &LoadTestConfig, cancel: CancellationToken) -> EngineResult<RunSummary>;
}

/// [`LoadRunner`] that sends real HTTP traffic
pub struct HttpLoadRunner {
    engine_config: EngineConfig,
    client: ClientContext,
    metrics: Option<Arc<dyn MetricsSink>>,
    transport_override: Option<Arc<dyn Transport>>,
}

impl HttpLoadRunner {
    pub fn new(engine_config: EngineConfig, client: ClientContext) -> Self {
        Self {
            engine_config,
            client,
            metrics: None,
            transport_override: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Send requests through `transport` instead of a fresh reqwest client
    ///
    /// Request files are still fetched with reqwest.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport_override = Some(transport);
        self
    }

    /// Build a ready-to-run engine for `config`
    pub async fn prepare(&self, config: &LoadTestConfig) -> EngineResult<LoadEngine> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let targets = match &self.engine_config.perf_targets_file {
            Some(path) => {
                let targets = PerfTargets::load(path).await?;
                debug!("Loaded {} performance targets from {}", targets.len(), path);
                targets
            }
            None => PerfTargets::new(),
        };

        let http = ReqwestTransport::new(&HttpConfig::from_engine(&self.engine_config, config.timeout))?;
        let source = RequestSource::resolve(&config.base_url, &self.engine_config.test_files_dir);
        let requests = load_requests(&source, &config.files, http.client()).await?;

        let transport: Arc<dyn Transport> = match &self.transport_override {
            Some(transport) => transport.clone(),
            None => Arc::new(http),
        };

        let mut engine = LoadEngine::new(transport, requests, targets, self.client.clone())?;
        if let Some(metrics) = &self.metrics {
            engine = engine.with_metrics(metrics.clone());
        }
        Ok(engine)
    }
}

#[async_trait]
impl LoadRunner for HttpLoadRunner {
    async fn run(&self, config: &LoadTestConfig, cancel: CancellationToken) -> EngineResult<RunSummary> {
        let engine = self.prepare(config).await?;
        let summary = engine.run(config, cancel).await;

        info!(
            load_test_config_id = %config.base.id,
            total = summary.total_requests,
            failed = summary.failed_requests,
            cancelled = summary.cancelled,
            "Load test finished"
        );
        Ok(summary)
    }
}

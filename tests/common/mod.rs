//! Fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use lode_config::LodeConfig;
use lode_core::{LoadClient, LoadTestConfig, TestRun};
use lode_engine::ClientContext;
use lode_engine::HttpLoadRunner;
use lode_http::{HttpError, HttpResponse, RequestDefinition, Transport};
use lode_resilience::{ShutdownCoordinator, SlotPool};
use lode_storage::MemoryStore;
use lode_worker::WorkerService;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Fake target server that counts concurrent requests
#[derive(Default)]
pub struct InstrumentedTransport {
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sent: AtomicUsize,
    servers: Mutex<Vec<String>>,
}

impl InstrumentedTransport {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            default_delay: delay,
            ..Self::default()
        }
    }

    /// Answer requests for `path` after `delay`
    pub fn delay_path(mut self, path: &str, delay: Duration) -> Self {
        self.delays.insert(path.to_string(), delay);
        self
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn servers(&self) -> Vec<String> {
        self.servers.lock().clone()
    }
}

#[async_trait]
impl Transport for InstrumentedTransport {
    async fn send(&self, server: &str, request: &RequestDefinition) -> Result<HttpResponse, HttpError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.servers.lock().push(server.to_string());

        let delay = self
            .delays
            .get(&request.path)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.sent.fetch_add(1, Ordering::SeqCst);

        Ok(HttpResponse {
            status: 200,
            content_type: Some("application/json".into()),
            content_length: 2,
            body: "{}".into(),
            correlation_id: "cv".into(),
        })
    }
}

/// Directory holding `f.json` with `paths` as GET requests
pub fn request_dir(paths: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let requests: Vec<_> = paths
        .iter()
        .map(|path| serde_json::json!({ "path": path }))
        .collect();
    std::fs::write(
        dir.path().join("f.json"),
        serde_json::json!({ "requests": requests }).to_string(),
    )
    .expect("write request file");
    dir
}

/// Configuration with short feed and lease intervals
pub fn fast_config(test_files_dir: &Path) -> LodeConfig {
    let mut config = LodeConfig::default();
    config.changefeed.feed_poll_interval = Duration::from_millis(10);
    config.changefeed.lease_acquire_interval = Duration::from_millis(50);
    config.engine.test_files_dir = test_files_dir.display().to_string();
    config
}

/// Distinct zones for workers started side by side
pub fn zones(count: usize) -> SlotPool<String> {
    SlotPool::new((0..count).map(|i| format!("az-test-{}", i)).collect())
}

/// Worker on `store` whose engine sends through `transport`
pub fn worker(config: &LodeConfig, store: &MemoryStore, transport: Arc<InstrumentedTransport>) -> WorkerService {
    let client = LoadClient::new(config.worker.startup_args.clone())
        .with_location(config.worker.region.clone(), config.worker.zone.clone());
    let context = ClientContext {
        load_client_id: client.base.id.clone(),
        zone: client.zone.clone(),
        region: client.region.clone(),
    };
    let runner = HttpLoadRunner::new(config.engine.clone(), context).with_transport(transport);

    WorkerService::with_load_client(
        config.clone(),
        Arc::new(store.clone()),
        Arc::new(runner),
        Arc::new(ShutdownCoordinator::new()),
        client,
    )
}

/// The run used throughout: one server, `f.json`, run-once
pub fn run_once_config() -> LoadTestConfig {
    let mut config = LoadTestConfig::new(vec!["http://x".into()], vec!["f.json".into()]);
    config.run_loop = false;
    config.sleep = 0;
    config.max_errors = 10;
    config
}

pub fn assigned_run(clients: Vec<LoadClient>) -> TestRun {
    TestRun::new(run_once_config(), clients)
}

/// Poll `probe` until it yields a value, failing after five seconds
pub async fn eventually<T, F, Fut>(what: &str, mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..500 {
        if let Some(value) = probe().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

//! Standalone worker against an in-process store
//!
//! Configuration comes from the YAML file named by `LODE_CONFIG`, or from
//! `LODE_*` environment variables alone when it is unset.

use anyhow::Result;
use lode_config::ConfigLoader;
use lode_resilience::ShutdownCoordinator;
use lode_storage::MemoryStore;
use lode_worker::WorkerService;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("LODE_CONFIG").ok();
    let config = ConfigLoader::new().load(config_path.as_deref())?;
    lode_logging::init_logging_from_config(&config.logging)?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let signals = shutdown.listen_for_signals();

    let store = MemoryStore::new();
    let cleanup = store.start_cleanup_task(config.store.cleanup_interval, shutdown.child_token());

    let worker = WorkerService::with_http_runner(config, Arc::new(store), shutdown.clone());
    let outcome = worker.run().await;

    signals.abort();
    let _ = cleanup.await;
    if let Some(reason) = shutdown.reason() {
        info!("Worker exited: {}", reason);
    }

    Ok(outcome?)
}

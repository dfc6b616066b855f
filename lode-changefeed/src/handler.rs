//! Subscriber interface and registry

use async_trait::async_trait;
use lode_core::{ClientStatus, LoadClient, LoadTestConfig, TestRun};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::event::ChangeEvent;

/// Receives decoded changes, one method per routed entity type
///
/// Every method defaults to a no-op so a subscriber only implements what it
/// cares about. The same change can be delivered more than once.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_client_status(&self, _status: &ClientStatus) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_load_client(&self, _client: &LoadClient) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_load_test_config(&self, _config: &LoadTestConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_test_run(&self, _run: &TestRun) -> anyhow::Result<()> {
        Ok(())
    }

    /// Route an event to the matching method
    async fn handle(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        match event {
            ChangeEvent::ClientStatus(status) => self.on_client_status(status).await,
            ChangeEvent::LoadClient(client) => self.on_load_client(client).await,
            ChangeEvent::LoadTestConfig(config) => self.on_load_test_config(config).await,
            ChangeEvent::TestRun(run) => self.on_test_run(run).await,
        }
    }
}

/// Handlers attached to a dispatcher
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Vec<Arc<dyn ChangeHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn ChangeHandler>) {
        self.handlers.write().push(handler);
    }

    /// Drop every registered handler
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Deliver one event to every handler
    ///
    /// A failing handler is logged and skipped; the remaining handlers
    /// still see the event. Returns the number of handler failures.
    pub async fn dispatch(&self, event: &ChangeEvent) -> usize {
        let handlers: Vec<_> = self.handlers.read().iter().cloned().collect();
        let mut failures = 0;

        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                failures += 1;
                warn!(
                    entity_type = %event.entity_type(),
                    id = event.id(),
                    "Change handler failed: {:#}",
                    e
                );
            }
        }

        if failures == 0 {
            debug!(entity_type = %event.entity_type(), id = event.id(), "Change delivered");
        }
        failures
    }
}

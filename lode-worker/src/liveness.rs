//! Persisted worker status and its refresh loop

use chrono::Utc;
use lode_config::WorkerConfig;
use lode_core::{ClientStatus, ClientStatusType, LoadClient};
use lode_storage::{ClientStatusService, StorageResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::WorkerResult;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Running {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of this worker's `ClientStatus` record
///
/// Every change is written through to the store with a fresh TTL. The store
/// drops the record once the worker stops writing, so a periodic refresh
/// keeps it alive while the process is healthy. Repeated write failures
/// cancel the process token.
pub struct LivenessTracker {
    service: ClientStatusService,
    load_client: LoadClient,
    ttl: i64,
    max_failures: u32,
    record: AsyncMutex<ClientStatus>,
    current: watch::Sender<ClientStatusType>,
    failures: AtomicU32,
    fatal: CancellationToken,
    refresh: Mutex<Option<Running>>,
}

impl LivenessTracker {
    pub fn new(
        service: ClientStatusService,
        load_client: LoadClient,
        config: &WorkerConfig,
        fatal: CancellationToken,
    ) -> Self {
        let mut record = ClientStatus::new(load_client.clone());
        record.ttl = config.client_status_ttl;
        let (current, _) = watch::channel(record.status);

        Self {
            service,
            load_client,
            ttl: config.client_status_ttl,
            max_failures: config.max_status_update_failures.max(1),
            record: AsyncMutex::new(record),
            current,
            failures: AtomicU32::new(0),
            fatal,
            refresh: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.load_client.base.id
    }

    pub fn load_client(&self) -> &LoadClient {
        &self.load_client
    }

    /// Status as last set locally, whether or not it was persisted
    pub fn current(&self) -> ClientStatusType {
        *self.current.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientStatusType> {
        self.current.subscribe()
    }

    pub async fn snapshot(&self) -> ClientStatus {
        self.record.lock().await.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Move to `status` with `message` and persist
    ///
    /// Returns whether the status value changed. A transition the state
    /// machine forbids fails without touching the record; a failed write
    /// keeps the local change so the next refresh can retry it.
    pub async fn set_status(&self, status: ClientStatusType, message: &str) -> WorkerResult<bool> {
        let mut record = self.record.lock().await;
        let now = Utc::now();
        let previous = record.status;

        let changed = record.set_status(status, now)?;
        record.set_message(message, now);

        if changed {
            info!(
                client_id = %self.client_id(),
                from = %previous,
                to = %status,
                "{}",
                message
            );
            self.current.send_replace(status);
        }

        self.persist(&mut record).await?;
        Ok(changed)
    }

    pub async fn set_message(&self, message: &str) -> WorkerResult<()> {
        let mut record = self.record.lock().await;
        record.set_message(message, Utc::now());
        self.persist(&mut record).await
    }

    /// Re-persist the current record to push its expiry out
    pub async fn refresh(&self) -> WorkerResult<()> {
        let mut record = self.record.lock().await;
        record.touch(Utc::now());
        self.persist(&mut record).await
    }

    /// Final transition to `Terminating`; repeated calls do nothing
    pub async fn terminate(&self) -> WorkerResult<()> {
        let mut record = self.record.lock().await;
        if record.status.is_terminal() {
            return Ok(());
        }

        record.ttl = self.ttl;
        let result = self.service.terminate(&mut record).await.map(|_| ());
        self.current.send_replace(record.status);
        self.record_outcome(result)
    }

    /// Refresh the record every `every` until stopped or the fatal token fires
    pub fn start_refresh(self: &Arc<Self>, every: Duration) {
        let mut running = self.refresh.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let stop = self.fatal.child_token();
        let tracker = Arc::clone(self);
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = tracker.refresh().await {
                            debug!("Status refresh failed: {}", e);
                        }
                    }
                }
            }
        });

        debug!(client_id = %self.client_id(), "Status refresh started every {:?}", every);
        *running = Some(Running { stop, handle });
    }

    pub async fn stop_refresh(&self) {
        let Some(running) = self.refresh.lock().take() else {
            return;
        };

        running.stop.cancel();
        if timeout(STOP_TIMEOUT, running.handle).await.is_err() {
            warn!(client_id = %self.client_id(), "Status refresh did not stop in time");
        }
    }

    async fn persist(&self, record: &mut ClientStatus) -> WorkerResult<()> {
        record.ttl = self.ttl;
        let result = self.service.post(record).await.map(|_| ());
        self.record_outcome(result)
    }

    fn record_outcome(&self, result: StorageResult<()>) -> WorkerResult<()> {
        match result {
            Ok(()) => {
                self.failures.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    client_id = %self.client_id(),
                    "Failed to persist client status ({}/{}): {}",
                    failures,
                    self.max_failures,
                    e
                );

                if failures >= self.max_failures {
                    error!(
                        client_id = %self.client_id(),
                        "Client status could not be persisted {} times in a row, shutting down",
                        failures
                    );
                    self.fatal.cancel();
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use lode_core::constants::{CLIENT_READY, TERMINATION_REQUESTED};
    use lode_core::CoreError;
    use lode_storage::MemoryStore;

    fn tracker(store: &MemoryStore, config: &WorkerConfig) -> (Arc<LivenessTracker>, CancellationToken) {
        let fatal = CancellationToken::new();
        let service = ClientStatusService::new(Arc::new(store.clone()));
        let tracker = LivenessTracker::new(service, LoadClient::new("--mode client"), config, fatal.clone());
        (Arc::new(tracker), fatal)
    }

    async fn stored(store: &MemoryStore, tracker: &LivenessTracker) -> Option<ClientStatus> {
        let id = tracker.snapshot().await.base.id;
        ClientStatusService::new(Arc::new(store.clone()))
            .get(&id)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_changes_are_persisted() {
        let store = MemoryStore::new();
        let (tracker, _) = tracker(&store, &WorkerConfig::default());
        let mut updates = tracker.subscribe();

        assert!(tracker.set_status(ClientStatusType::Ready, CLIENT_READY).await.unwrap());
        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), ClientStatusType::Ready);

        let first = stored(&store, &tracker).await.unwrap();
        assert_eq!(first.status, ClientStatusType::Ready);
        assert_eq!(first.message, CLIENT_READY);
        assert_eq!(first.ttl, 60);

        // Same status again only moves last_updated
        assert!(!tracker.set_status(ClientStatusType::Ready, "still ready").await.unwrap());
        let second = stored(&store, &tracker).await.unwrap();
        assert_eq!(second.last_status_change, first.last_status_change);
        assert!(second.last_updated >= first.last_updated);
        assert!(second.last_status_change <= second.last_updated);
        assert!(!updates.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_forbidden_transition_is_rejected() {
        let store = MemoryStore::new();
        let (tracker, _) = tracker(&store, &WorkerConfig::default());

        let result = tracker.set_status(ClientStatusType::Testing, "too early").await;
        assert!(matches!(
            result,
            Err(WorkerError::Core(CoreError::InvalidTransition { .. }))
        ));
        assert_eq!(tracker.current(), ClientStatusType::Starting);
        assert!(stored(&store, &tracker).await.is_none());
    }

    #[tokio::test]
    async fn test_terminate_is_final() {
        let store = MemoryStore::new();
        let (tracker, _) = tracker(&store, &WorkerConfig::default());
        tracker.set_status(ClientStatusType::Ready, CLIENT_READY).await.unwrap();

        tracker.terminate().await.unwrap();
        tracker.terminate().await.unwrap();

        let record = stored(&store, &tracker).await.unwrap();
        assert_eq!(record.status, ClientStatusType::Terminating);
        assert_eq!(record.message, TERMINATION_REQUESTED);
        assert!(tracker.set_status(ClientStatusType::Ready, CLIENT_READY).await.is_err());
    }

    #[tokio::test]
    async fn test_repeated_write_failures_cancel_the_process() {
        let store = MemoryStore::new();
        let (tracker, fatal) = tracker(&store, &WorkerConfig::default());
        store.set_available(false);

        for _ in 0..2 {
            assert!(tracker.refresh().await.is_err());
        }
        assert!(!fatal.is_cancelled());

        // A success in between resets the count
        store.set_available(true);
        tracker.refresh().await.unwrap();
        assert_eq!(tracker.consecutive_failures(), 0);

        store.set_available(false);
        for _ in 0..3 {
            assert!(tracker.refresh().await.is_err());
        }
        assert!(fatal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_the_record_alive() {
        let store = MemoryStore::new();
        let config = WorkerConfig {
            client_status_ttl: 3,
            ..WorkerConfig::default()
        };
        let (tracker, _) = tracker(&store, &config);
        tracker.set_status(ClientStatusType::Ready, CLIENT_READY).await.unwrap();

        tracker.start_refresh(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(stored(&store, &tracker).await.is_some());

        tracker.stop_refresh().await;
        tracker.stop_refresh().await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(stored(&store, &tracker).await.is_none());
    }
}

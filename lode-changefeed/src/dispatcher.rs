//! Leased, per-partition change feed consumption

use lode_config::ChangeFeedConfig;
use lode_storage::{ChangeFeed, Lease, LeaseStore};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ChangeFeedError, ChangeFeedResult};
use crate::event::ChangeEvent;
use crate::handler::HandlerRegistry;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    leases: Arc<dyn LeaseStore>,
}

/// Consumes the change feed and fans changes out to registered handlers
///
/// Leases are scoped by the configured `processor_name`. Dispatchers of the
/// same processor split the partitions: each partition is processed by
/// whichever of them holds its lease, and partitions that are free or whose
/// lease expired are picked up on the next acquire tick, resuming from the
/// last checkpoint. Dispatchers of different processors each consume the
/// whole feed with their own checkpoints.
pub struct ChangeDispatcher {
    host_id: String,
    config: ChangeFeedConfig,
    registry: Arc<HandlerRegistry>,
    owned: Arc<Mutex<BTreeSet<String>>>,
    running: Mutex<Option<Running>>,
}

impl ChangeDispatcher {
    pub fn new(host_id: impl Into<String>, config: ChangeFeedConfig) -> Self {
        Self {
            host_id: host_id.into(),
            config,
            registry: Arc::new(HandlerRegistry::new()),
            owned: Arc::new(Mutex::new(BTreeSet::new())),
            running: Mutex::new(None),
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Feed partitions this dispatcher currently holds
    pub fn owned_partitions(&self) -> Vec<String> {
        self.owned.lock().iter().cloned().collect()
    }

    /// Begin consuming `feed`
    ///
    /// Leases for every free partition are taken before anything is
    /// delivered, then `on_ready` runs exactly once so handlers can be
    /// registered without missing a change. Failing to list partitions or
    /// to talk to the lease store is returned to the caller.
    pub async fn start<F>(&self, feed: ChangeFeed, on_ready: F) -> ChangeFeedResult<()>
    where
        F: FnOnce(&HandlerRegistry) + Send,
    {
        if self.is_running() {
            return Err(ChangeFeedError::AlreadyStarted(self.host_id.clone()));
        }

        info!(host_id = %self.host_id, "Starting change dispatcher");

        let partitions = feed.source.partitions().await?;
        let mut leases = Vec::new();
        for partition in &partitions {
            if let Some(lease) = feed
                .leases
                .acquire(&self.config.lease_key(partition), &self.host_id, self.config.lease_duration)
                .await?
            {
                leases.push((partition.clone(), lease));
            }
        }

        on_ready(&self.registry);

        let cancel = CancellationToken::new();
        let lease_store = feed.leases.clone();
        let supervisor = Supervisor {
            host_id: self.host_id.clone(),
            config: self.config.clone(),
            feed,
            registry: self.registry.clone(),
            owned: self.owned.clone(),
            cancel: cancel.clone(),
        };

        info!(
            host_id = %self.host_id,
            processor = %self.config.processor_name,
            acquired = leases.len(),
            partitions = partitions.len(),
            "Change dispatcher started"
        );

        let handle = tokio::spawn(supervisor.run(leases));

        let mut running = self.running.lock();
        if running.is_some() {
            // Lost a race with a concurrent start
            cancel.cancel();
            return Err(ChangeFeedError::AlreadyStarted(self.host_id.clone()));
        }
        *running = Some(Running {
            cancel,
            handle,
            leases: lease_store,
        });
        Ok(())
    }

    /// Stop consuming and release every held lease
    ///
    /// Handlers registered through `on_ready` are dropped, so a later
    /// `start` registers a fresh set. Safe to call repeatedly and before
    /// `start`.
    pub async fn stop(&self) {
        let Some(mut running) = self.running.lock().take() else {
            return;
        };

        info!(host_id = %self.host_id, "Stopping change dispatcher");
        running.cancel.cancel();

        if timeout(STOP_TIMEOUT, &mut running.handle).await.is_err() {
            warn!(host_id = %self.host_id, "Change dispatcher did not stop in time, aborting");
            running.handle.abort();
            release_owned(&self.host_id, &self.config, &self.owned, running.leases.as_ref()).await;
        }

        self.registry.clear();
        info!(host_id = %self.host_id, "Change dispatcher stopped");
    }
}

impl Drop for ChangeDispatcher {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

/// Give back every lease recorded in `owned`
async fn release_owned(
    host_id: &str,
    config: &ChangeFeedConfig,
    owned: &Mutex<BTreeSet<String>>,
    leases: &dyn LeaseStore,
) {
    let partitions: Vec<String> = std::mem::take(&mut *owned.lock()).into_iter().collect();
    for partition in partitions {
        if let Err(e) = leases.release(&config.lease_key(&partition), host_id).await {
            warn!(host_id = %host_id, partition = %partition, "Failed to release lease: {}", e);
        }
    }
}

/// Owns the per-partition consumers and claims free leases
struct Supervisor {
    host_id: String,
    config: ChangeFeedConfig,
    feed: ChangeFeed,
    registry: Arc<HandlerRegistry>,
    owned: Arc<Mutex<BTreeSet<String>>>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self, initial: Vec<(String, Lease)>) {
        let mut consumers = JoinSet::new();
        for (partition, lease) in initial {
            self.spawn_consumer(&mut consumers, partition, lease);
        }

        let mut acquire_tick = interval(self.config.lease_acquire_interval);
        acquire_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        acquire_tick.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(finished) = consumers.join_next() => {
                    match finished {
                        Ok(partition) => {
                            self.owned.lock().remove(&partition);
                        }
                        Err(e) => error!(host_id = %self.host_id, "Partition consumer panicked: {}", e),
                    }
                }
                _ = acquire_tick.tick() => {
                    self.acquire_free(&mut consumers).await;
                }
            }
        }

        while let Some(finished) = consumers.join_next().await {
            if let Err(e) = finished {
                error!(host_id = %self.host_id, "Partition consumer panicked: {}", e);
            }
        }

        release_owned(&self.host_id, &self.config, &self.owned, self.feed.leases.as_ref()).await;
    }

    async fn acquire_free(&self, consumers: &mut JoinSet<String>) {
        let partitions = match self.feed.source.partitions().await {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!(host_id = %self.host_id, "Cannot list change feed partitions: {}", e);
                return;
            }
        };

        for partition in partitions {
            if self.owned.lock().contains(&partition) {
                continue;
            }
            match self
                .feed
                .leases
                .acquire(&self.config.lease_key(&partition), &self.host_id, self.config.lease_duration)
                .await
            {
                Ok(Some(lease)) => {
                    info!(host_id = %self.host_id, partition = %partition, "Acquired partition lease");
                    self.spawn_consumer(consumers, partition, lease);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(host_id = %self.host_id, partition = %partition, "Lease acquire failed: {}", e)
                }
            }
        }
    }

    fn spawn_consumer(&self, consumers: &mut JoinSet<String>, partition: String, lease: Lease) {
        self.owned.lock().insert(partition.clone());

        let consumer = PartitionConsumer {
            host_id: self.host_id.clone(),
            config: self.config.clone(),
            feed: self.feed.clone(),
            registry: self.registry.clone(),
            cancel: self.cancel.child_token(),
        };
        consumers.spawn(consumer.run(partition, lease));
    }
}

/// Reads one partition in log order while its lease is held
struct PartitionConsumer {
    host_id: String,
    config: ChangeFeedConfig,
    feed: ChangeFeed,
    registry: Arc<HandlerRegistry>,
    cancel: CancellationToken,
}

impl PartitionConsumer {
    /// Returns the partition name once the consumer stops
    async fn run(self, partition: String, lease: Lease) -> String {
        let lease_key = lease.partition;
        let mut position = match lease.checkpoint {
            Some(lsn) => Some(lsn),
            None if self.config.start_from_beginning => None,
            None => self.feed.source.latest_lsn(&partition).await.unwrap_or_else(|e| {
                warn!(partition = %partition, "Cannot read latest lsn, starting from the beginning: {}", e);
                None
            }),
        };

        debug!(host_id = %self.host_id, partition = %partition, ?position, "Partition consumer started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self
                .feed
                .leases
                .renew(&lease_key, &self.host_id, self.config.lease_duration)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    info!(host_id = %self.host_id, partition = %partition, "Partition lease lost");
                    break;
                }
                Err(e) => warn!(partition = %partition, "Lease renewal failed: {}", e),
            }

            let batch = match self
                .feed
                .source
                .read_changes(&partition, position, self.config.max_batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(partition = %partition, "Reading changes failed: {}", e);
                    Vec::new()
                }
            };

            let full = batch.len() >= self.config.max_batch_size;
            if let Some(last) = batch.last().map(|doc| doc.lsn) {
                for document in &batch {
                    match ChangeEvent::from_document(document) {
                        Ok(event) => {
                            self.registry.dispatch(&event).await;
                        }
                        Err(e) => warn!(partition = %partition, lsn = document.lsn, "Dropping change: {}", e),
                    }
                }

                match self.feed.leases.checkpoint(&lease_key, &self.host_id, last).await {
                    Ok(true) => position = Some(last),
                    Ok(false) => {
                        info!(host_id = %self.host_id, partition = %partition, "Partition lease lost before checkpoint");
                        break;
                    }
                    Err(e) => {
                        // Keep going from memory; the batch is redelivered after a failover
                        warn!(partition = %partition, "Checkpoint failed: {}", e);
                        position = Some(last);
                    }
                }
            }

            if !full {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.feed_poll_interval) => {}
                }
            }
        }

        debug!(host_id = %self.host_id, partition = %partition, "Partition consumer stopped");
        partition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lode_core::{ClientStatus, EntityType, LoadClient, LoadTestConfig, TestRun};
    use lode_storage::{DocumentStore, LeaseStore, MemoryStore};
    use tokio::sync::mpsc;

    use crate::handler::ChangeHandler;

    struct Forward(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl ChangeHandler for Forward {
        async fn on_test_run(&self, run: &TestRun) -> anyhow::Result<()> {
            let _ = self.0.send(run.base.id.clone());
            Ok(())
        }

        async fn on_client_status(&self, status: &ClientStatus) -> anyhow::Result<()> {
            if status.message == "fail" {
                anyhow::bail!("handler rejected {}", status.base.id);
            }
            let _ = self.0.send(status.base.id.clone());
            Ok(())
        }
    }

    fn config() -> ChangeFeedConfig {
        ChangeFeedConfig {
            lease_duration: Duration::from_secs(2),
            lease_acquire_interval: Duration::from_millis(100),
            feed_poll_interval: Duration::from_millis(20),
            max_batch_size: 10,
            start_from_beginning: true,
            processor_name: String::new(),
        }
    }

    fn test_run() -> TestRun {
        TestRun::new(
            LoadTestConfig::new(vec!["http://x".into()], vec!["f.json".into()]),
            vec![LoadClient::new("args")],
        )
    }

    async fn put<T: serde::Serialize>(store: &MemoryStore, entity: &T) {
        store
            .upsert(serde_json::to_value(entity).unwrap(), None)
            .await
            .unwrap();
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("change was not delivered")
            .expect("channel closed")
    }

    async fn start_forwarding(
        dispatcher: &ChangeDispatcher,
        store: &MemoryStore,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher
            .start(store.open_change_feed().await.unwrap(), move |registry| {
                registry.register(Arc::new(Forward(tx)))
            })
            .await
            .unwrap();
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_changes_are_delivered_after_on_ready() {
        let store = MemoryStore::new();
        let first = test_run();
        let second = test_run();
        put(&store, &first).await;
        put(&store, &second).await;

        let dispatcher = ChangeDispatcher::new("host-a", config());
        let mut rx = start_forwarding(&dispatcher, &store).await;

        assert_eq!(next(&mut rx).await, first.base.id);
        assert_eq!(next(&mut rx).await, second.base.id);

        let third = test_run();
        put(&store, &third).await;
        assert_eq!(next(&mut rx).await, third.base.id);

        assert!(dispatcher.owned_partitions().contains(&"TestRun".to_string()));
        dispatcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_documents_and_handler_errors_do_not_stop_the_batch() {
        let store = MemoryStore::new();

        let mut failing = ClientStatus::new(LoadClient::new("args"));
        failing.message = "fail".into();
        let healthy = ClientStatus::new(LoadClient::new("args"));

        put(&store, &failing).await;
        store
            .upsert(
                serde_json::json!({
                    "id": "junk",
                    "partitionKey": "ClientStatus",
                    "entityType": "Unassigned"
                }),
                None,
            )
            .await
            .unwrap();
        put(&store, &healthy).await;

        let dispatcher = ChangeDispatcher::new("host-a", config());
        let mut rx = start_forwarding(&dispatcher, &store).await;

        assert_eq!(next(&mut rx).await, healthy.base.id);
        dispatcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_releases_leases() {
        let store = MemoryStore::new();
        let dispatcher = ChangeDispatcher::new("host-a", config());

        dispatcher.stop().await;
        assert!(!dispatcher.is_running());

        let _rx = start_forwarding(&dispatcher, &store).await;
        assert!(dispatcher.is_running());
        assert_eq!(
            store.lease_owner(EntityType::TestRun.as_str()).as_deref(),
            Some("host-a")
        );

        dispatcher.stop().await;
        dispatcher.stop().await;
        assert!(!dispatcher.is_running());
        assert_eq!(store.lease_owner(EntityType::TestRun.as_str()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let store = MemoryStore::new();
        let dispatcher = ChangeDispatcher::new("host-a", config());
        let _rx = start_forwarding(&dispatcher, &store).await;

        let err = dispatcher
            .start(store.open_change_feed().await.unwrap(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ChangeFeedError::AlreadyStarted(_)));
        dispatcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_store_fails_start() {
        let store = MemoryStore::new();
        let feed = store.open_change_feed().await.unwrap();
        store.set_available(false);

        let dispatcher = ChangeDispatcher::new("host-a", config());
        let mut ready = false;
        let err = dispatcher.start(feed, |_| ready = true).await.unwrap_err();

        assert!(matches!(err, ChangeFeedError::Storage(_)));
        assert!(!ready);
        assert!(!dispatcher.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resumes_from_checkpoint() {
        let store = MemoryStore::new();
        let first = test_run();
        put(&store, &first).await;

        let dispatcher = ChangeDispatcher::new("host-a", config());
        let mut rx = start_forwarding(&dispatcher, &store).await;
        assert_eq!(next(&mut rx).await, first.base.id);
        dispatcher.stop().await;

        let second = test_run();
        put(&store, &second).await;

        let mut rx = start_forwarding(&dispatcher, &store).await;
        assert_eq!(next(&mut rx).await, second.base.id);
        dispatcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_registers_handlers_once() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = ChangeDispatcher::new("host-a", config());

        for _ in 0..2 {
            let tx = tx.clone();
            dispatcher
                .start(store.open_change_feed().await.unwrap(), move |registry| {
                    registry.register(Arc::new(Forward(tx)))
                })
                .await
                .unwrap();
            assert_eq!(dispatcher.registry().len(), 1);
            dispatcher.stop().await;
            assert!(dispatcher.registry().is_empty());
        }

        let tx = tx.clone();
        dispatcher
            .start(store.open_change_feed().await.unwrap(), move |registry| {
                registry.register(Arc::new(Forward(tx)))
            })
            .await
            .unwrap();

        let run = test_run();
        put(&store, &run).await;
        assert_eq!(next(&mut rx).await, run.base.id);
        assert!(timeout(Duration::from_millis(500), rx.recv()).await.is_err());
        dispatcher.stop().await;
    }

    struct Stuck(mpsc::UnboundedSender<()>);

    #[async_trait]
    impl ChangeHandler for Stuck {
        async fn on_test_run(&self, _run: &TestRun) -> anyhow::Result<()> {
            let _ = self.0.send(());
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_leases_when_a_handler_hangs() {
        let store = MemoryStore::new();
        put(&store, &test_run()).await;

        let (tx, mut entered) = mpsc::unbounded_channel();
        let dispatcher = ChangeDispatcher::new("host-a", config());
        dispatcher
            .start(store.open_change_feed().await.unwrap(), move |registry| {
                registry.register(Arc::new(Stuck(tx)))
            })
            .await
            .unwrap();

        timeout(Duration::from_secs(5), entered.recv())
            .await
            .expect("handler was not called")
            .expect("channel closed");

        dispatcher.stop().await;

        assert!(!dispatcher.is_running());
        assert!(dispatcher.owned_partitions().is_empty());
        assert_eq!(store.lease_owner(EntityType::TestRun.as_str()), None);
        assert_eq!(store.lease_owner(EntityType::ClientStatus.as_str()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_processors_each_read_every_partition() {
        let store = MemoryStore::new();

        let mut first_config = config();
        first_config.processor_name = "client-1".into();
        let mut second_config = config();
        second_config.processor_name = "client-2".into();

        let first = ChangeDispatcher::new("host-a", first_config);
        let second = ChangeDispatcher::new("host-b", second_config);
        let mut first_rx = start_forwarding(&first, &store).await;
        let mut second_rx = start_forwarding(&second, &store).await;

        let run = test_run();
        put(&store, &run).await;
        assert_eq!(next(&mut first_rx).await, run.base.id);
        assert_eq!(next(&mut second_rx).await, run.base.id);

        assert_eq!(first.owned_partitions(), second.owned_partitions());
        assert!(first.owned_partitions().contains(&"TestRun".to_string()));
        assert_eq!(store.lease_owner("client-1.TestRun").as_deref(), Some("host-a"));
        assert_eq!(store.lease_owner("client-2.TestRun").as_deref(), Some("host-b"));

        first.stop().await;
        second.stop().await;
        assert_eq!(store.lease_owner("client-1.TestRun"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partitions_held_elsewhere_are_skipped() {
        let store = MemoryStore::new();
        store
            .acquire("TestRun", "host-b", Duration::from_secs(60))
            .await
            .unwrap();

        let dispatcher = ChangeDispatcher::new("host-a", config());
        let _rx = start_forwarding(&dispatcher, &store).await;

        let owned = dispatcher.owned_partitions();
        assert!(!owned.contains(&"TestRun".to_string()));
        assert!(owned.contains(&"ClientStatus".to_string()));
        dispatcher.stop().await;
    }
}

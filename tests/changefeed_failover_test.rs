//! Partition leases move between dispatchers without losing or repeating changes

mod common;

use anyhow::Result;
use async_trait::async_trait;
use lode_changefeed::{ChangeDispatcher, ChangeHandler};
use lode_config::ChangeFeedConfig;
use lode_core::{EntityType, LoadClient, TestRun};
use lode_storage::{DocumentStore, LeaseStore, MemoryStore, TestRunService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

struct RunIds(mpsc::UnboundedSender<String>);

#[async_trait]
impl ChangeHandler for RunIds {
    async fn on_test_run(&self, run: &TestRun) -> anyhow::Result<()> {
        let _ = self.0.send(run.base.id.clone());
        Ok(())
    }
}

fn feed_config() -> ChangeFeedConfig {
    ChangeFeedConfig {
        lease_duration: Duration::from_secs(2),
        lease_acquire_interval: Duration::from_millis(100),
        feed_poll_interval: Duration::from_millis(20),
        ..ChangeFeedConfig::default()
    }
}

async fn start(dispatcher: &ChangeDispatcher, store: &MemoryStore) -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    dispatcher
        .start(store.open_change_feed().await?, move |registry| {
            registry.register(Arc::new(RunIds(tx)))
        })
        .await?;
    Ok(rx)
}

async fn post_runs(store: &MemoryStore, count: usize) -> Result<Vec<String>> {
    let test_runs = TestRunService::new(Arc::new(store.clone()));
    let mut ids = Vec::new();
    for _ in 0..count {
        let run = common::assigned_run(vec![LoadClient::new("args")]);
        test_runs.post(&run).await?;
        ids.push(run.base.id);
    }
    Ok(ids)
}

async fn receive(rx: &mut mpsc::UnboundedReceiver<String>, count: usize) -> Vec<String> {
    let mut ids = Vec::new();
    for _ in 0..count {
        let id = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("change was not delivered")
            .expect("channel closed");
        ids.push(id);
    }
    ids
}

#[tokio::test(start_paused = true)]
async fn test_released_partitions_resume_on_another_host() -> Result<()> {
    println!("Testing lease handover after a graceful stop");

    let store = MemoryStore::new();
    let host_a = ChangeDispatcher::new("host-a", feed_config());
    let host_b = ChangeDispatcher::new("host-b", feed_config());

    let mut from_a = start(&host_a, &store).await?;
    let mut from_b = start(&host_b, &store).await?;
    assert_eq!(host_a.owned_partitions().len(), EntityType::all().len());
    assert!(host_b.owned_partitions().is_empty());

    let first = post_runs(&store, 3).await?;
    assert_eq!(receive(&mut from_a, 3).await, first);
    println!("host-a processed {} runs", first.len());

    host_a.stop().await;
    assert_eq!(store.lease_owner(EntityType::TestRun.as_str()), None);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        store.lease_owner(EntityType::TestRun.as_str()).as_deref(),
        Some("host-b")
    );

    let second = post_runs(&store, 2).await?;
    assert_eq!(receive(&mut from_b, 2).await, second);

    // Nothing from before the handover is delivered again
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(from_b.try_recv().is_err());

    host_b.stop().await;
    println!("✓ host-b resumed from the checkpoint");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_expired_lease_of_a_vanished_host_is_taken_over() -> Result<()> {
    println!("Testing takeover of a lease that is no longer renewed");

    let store = MemoryStore::new();
    store
        .acquire(EntityType::TestRun.as_str(), "host-gone", Duration::from_secs(2))
        .await?;

    let posted = post_runs(&store, 2).await?;

    let host_b = ChangeDispatcher::new("host-b", feed_config());
    let mut from_b = start(&host_b, &store).await?;
    assert!(!host_b
        .owned_partitions()
        .contains(&EntityType::TestRun.as_str().to_string()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(from_b.try_recv().is_err());

    // Lease lapses after two seconds, the next acquire tick claims it
    assert_eq!(receive(&mut from_b, 2).await, posted);
    assert_eq!(
        store.lease_owner(EntityType::TestRun.as_str()).as_deref(),
        Some("host-b")
    );

    host_b.stop().await;
    println!("✓ Lease taken over after expiry");
    Ok(())
}

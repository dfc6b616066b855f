//! A worker picks up a TestRun from the store, runs it and reports once

mod common;

use anyhow::Result;
use chrono::Utc;
use common::InstrumentedTransport;
use lode_changefeed::ChangeHandler;
use lode_core::constants::HARD_STOP_MARKER;
use lode_core::{ClientStatusType, TestRun};
use lode_storage::{MemoryStore, TestRunService};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

async fn completed(test_runs: &TestRunService, id: &str) -> TestRun {
    common::eventually("the run to complete", || async {
        test_runs
            .get(id)
            .await
            .ok()
            .flatten()
            .filter(|run| run.completed_time.is_some())
    })
    .await
}

#[tokio::test]
async fn test_assigned_run_is_executed_and_reported() -> Result<()> {
    println!("Testing assignment from post to reported result");

    let dir = common::request_dir(&["/api/a", "/api/b"]);
    let config = common::fast_config(dir.path());
    let store = MemoryStore::new();
    let transport = Arc::new(InstrumentedTransport::with_delay(Duration::from_millis(100)));
    let worker = common::worker(&config, &store, transport.clone());

    let mut statuses = worker.liveness().subscribe();
    worker.start().await?;
    assert_eq!(*statuses.borrow_and_update(), ClientStatusType::Ready);

    let test_runs = TestRunService::new(Arc::new(store.clone()));
    let run = common::assigned_run(vec![worker.liveness().load_client().clone()]);
    test_runs.post(&run).await?;

    timeout(
        Duration::from_secs(5),
        statuses.wait_for(|s| *s == ClientStatusType::Testing),
    )
    .await??;
    println!("Worker moved to Testing");

    timeout(
        Duration::from_secs(5),
        statuses.wait_for(|s| *s == ClientStatusType::Ready),
    )
    .await??;
    println!("Worker is Ready again");

    let stored = completed(&test_runs, &run.base.id).await;
    assert_eq!(stored.client_results.len(), 1);

    let result = &stored.client_results[0];
    assert_eq!(result.load_client.base.id, worker.client_id());
    assert_eq!(result.total_requests, 2);
    assert_eq!(result.failed_requests, 0);
    assert_eq!(result.successful_requests, 2);
    assert!(result.error_message.is_none());
    assert!(result.completed_time >= result.start_time);
    assert_eq!(transport.sent(), 2);

    worker.stop().await;
    println!("✓ Run executed once and result recorded");
    Ok(())
}

#[tokio::test]
async fn test_hard_stopped_run_reports_without_sending() -> Result<()> {
    println!("Testing a run hard-stopped before the worker saw it");

    let dir = common::request_dir(&["/api/a"]);
    let config = common::fast_config(dir.path());
    let store = MemoryStore::new();
    let transport = Arc::new(InstrumentedTransport::default());
    let worker = common::worker(&config, &store, transport.clone());

    let test_runs = TestRunService::new(Arc::new(store.clone()));
    let mut run = common::assigned_run(vec![worker.liveness().load_client().clone()]);
    run.hard_stop = true;
    run.hard_stop_time = Some(Utc::now());
    test_runs.post(&run).await?;

    worker.start().await?;

    let stored = completed(&test_runs, &run.base.id).await;
    assert_eq!(stored.client_results.len(), 1);

    let result = &stored.client_results[0];
    assert_eq!(result.total_requests, 0);
    assert_eq!(result.error_message.as_deref(), Some(HARD_STOP_MARKER));
    assert_eq!(transport.sent(), 0);
    assert_eq!(worker.liveness().current(), ClientStatusType::Ready);

    worker.stop().await;
    println!("✓ HardStop recorded without traffic");
    Ok(())
}

#[tokio::test]
async fn test_replayed_run_is_not_executed_again() -> Result<()> {
    println!("Testing redelivery of an already reported run");

    let dir = common::request_dir(&["/api/a"]);
    let config = common::fast_config(dir.path());
    let store = MemoryStore::new();
    let transport = Arc::new(InstrumentedTransport::default());
    let worker = common::worker(&config, &store, transport.clone());
    worker.start().await?;

    let test_runs = TestRunService::new(Arc::new(store.clone()));
    let run = common::assigned_run(vec![worker.liveness().load_client().clone()]);
    test_runs.post(&run).await?;

    let first = completed(&test_runs, &run.base.id).await;
    let sent = transport.sent();
    assert_eq!(sent, 1);

    // The posted version carries no result, like a change replayed after failover
    worker.coordinator().on_test_run(&run).await?;
    worker.coordinator().wait_idle().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = test_runs.get(&run.base.id).await?.expect("run exists");
    assert_eq!(second.client_results.len(), 1);
    assert_eq!(second.completed_time, first.completed_time);
    assert_eq!(transport.sent(), sent);
    assert!(worker.coordinator().active_run().is_none());
    assert_eq!(worker.liveness().current(), ClientStatusType::Ready);

    worker.stop().await;
    println!("✓ Replay ignored");
    Ok(())
}

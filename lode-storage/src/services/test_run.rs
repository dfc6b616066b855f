use chrono::Utc;
use lode_core::{TestRun, TestRunPayload};
use lode_resilience::{RetryExecutor, RetryPolicy};
use std::time::Duration;

use super::EntityService;
use crate::document::DocumentQuery;
use crate::error::{StorageError, StorageResult};

pub type TestRunService = EntityService<TestRun>;

impl EntityService<TestRun> {
    /// Incomplete runs assigned to `client_id` that it has not reported on
    pub async fn get_new_test_runs_by_load_client_id(
        &self,
        client_id: &str,
    ) -> StorageResult<Vec<TestRun>> {
        let query = DocumentQuery::of::<TestRun>()
            .is_null("completedTime")
            .array_contains("loadClients", "id", client_id);

        let runs = self.query(query).await?;
        Ok(runs
            .into_iter()
            .filter(|run| run.result_for(client_id).is_none())
            .collect())
    }

    /// Merge a partial update, re-reading and retrying when another writer
    /// got there first
    pub async fn apply_payload(
        &self,
        id: &str,
        payload: &TestRunPayload,
    ) -> StorageResult<Option<(TestRun, Vec<&'static str>)>> {
        let executor = RetryExecutor::new(RetryPolicy::optimistic(5, Duration::from_millis(20)));

        executor
            .execute(move || async move {
                let Some((mut run, etag)) = self.get_with_etag(id).await? else {
                    return Ok(None);
                };

                let changed = payload.merge_into(&mut run, Utc::now());
                if changed.is_empty() {
                    return Ok(Some((run, changed)));
                }

                let (stored, _) = self.replace_if_match(&run, &etag).await?;
                tracing::info!(test_run_id = %id, fields = ?changed, "TestRun updated");
                Ok::<_, StorageError>(Some((stored, changed)))
            })
            .await
            .map_err(|e| e.into_inner())
    }

    /// Request a cooperative stop of a run
    pub async fn hard_stop(&self, id: &str) -> StorageResult<TestRun> {
        self.apply_payload(id, &TestRunPayload::hard_stop())
            .await?
            .map(|(run, _)| run)
            .ok_or(StorageError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use lode_core::{LoadClient, LoadResult, LoadTestConfig};
    use std::sync::Arc;

    fn run_for(clients: Vec<LoadClient>) -> TestRun {
        TestRun::new(
            LoadTestConfig::new(vec!["http://localhost".into()], vec!["baseline.json".into()]),
            clients,
        )
    }

    fn service() -> TestRunService {
        TestRunService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_new_runs_for_client() {
        let service = service();
        let a = LoadClient::new("a");
        let b = LoadClient::new("b");

        let shared = run_for(vec![a.clone(), b.clone()]);
        let only_b = run_for(vec![b.clone()]);
        service.post(&shared).await.unwrap();
        service.post(&only_b).await.unwrap();

        let mut reported = run_for(vec![a.clone(), b.clone()]);
        let now = Utc::now();
        reported
            .append_result(LoadResult::new(a.clone(), now, now, 1, 0))
            .unwrap();
        service.post(&reported).await.unwrap();

        let mut done = run_for(vec![a.clone()]);
        done.append_result(LoadResult::new(a.clone(), now, now, 1, 0))
            .unwrap();
        service.post(&done).await.unwrap();

        let for_a = service.get_new_test_runs_by_load_client_id(&a.base.id).await.unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].base.id, shared.base.id);

        let for_b = service.get_new_test_runs_by_load_client_id(&b.base.id).await.unwrap();
        assert_eq!(for_b.len(), 3);
    }

    #[tokio::test]
    async fn test_stale_etag_is_rejected() {
        let service = service();
        let run = service.post(&run_for(vec![LoadClient::new("a")])).await.unwrap();
        let (_, etag) = service.get_with_etag(&run.base.id).await.unwrap().unwrap();

        service.post(&run).await.unwrap();
        let err = service.replace_if_match(&run, &etag).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_duplicate_clients_are_rejected() {
        let service = service();
        let client = LoadClient::new("a");
        let err = service
            .post(&run_for(vec![client.clone(), client]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ValidationFailed(msg) if msg.contains("duplicate load client id")));
    }

    #[tokio::test]
    async fn test_hard_stop() {
        let service = service();
        let run = service.post(&run_for(vec![LoadClient::new("a")])).await.unwrap();

        let stopped = service.hard_stop(&run.base.id).await.unwrap();
        assert!(stopped.hard_stop);
        assert!(stopped.hard_stop_time.is_some());

        assert!(matches!(
            service.hard_stop("missing").await,
            Err(StorageError::NotFound)
        ));
    }
}

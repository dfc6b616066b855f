use lode_core::{LoadTestConfig, LoadTestConfigPayload};

use super::EntityService;
use crate::error::StorageResult;

pub type LoadTestConfigService = EntityService<LoadTestConfig>;

impl EntityService<LoadTestConfig> {
    /// Merge a partial update into a stored config
    ///
    /// Returns `None` when the config does not exist, otherwise the stored
    /// config and the names of the fields that changed. Nothing is written
    /// when no field changed.
    pub async fn apply_payload(
        &self,
        id: &str,
        payload: &LoadTestConfigPayload,
    ) -> StorageResult<Option<(LoadTestConfig, Vec<&'static str>)>> {
        let Some((mut config, etag)) = self.get_with_etag(id).await? else {
            return Ok(None);
        };

        let changed = payload.merge_into(&mut config);
        if changed.is_empty() {
            return Ok(Some((config, changed)));
        }

        let (stored, _) = self.replace_if_match(&config, &etag).await?;
        Ok(Some((stored, changed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::MemoryStore;
    use std::sync::Arc;

    fn config() -> LoadTestConfig {
        LoadTestConfig::new(vec!["http://localhost".into()], vec!["baseline.json".into()])
    }

    #[tokio::test]
    async fn test_apply_payload() {
        let service = LoadTestConfigService::new(Arc::new(MemoryStore::new()));
        let config = service.post(&config()).await.unwrap();

        let payload = LoadTestConfigPayload {
            run_loop: Some(true),
            duration: Some(30),
            ..Default::default()
        };
        let (stored, changed) = service
            .apply_payload(&config.base.id, &payload)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(changed, vec!["RunLoop", "Duration"]);
        assert_eq!(stored.duration, 30);
        assert!(service.apply_payload("missing", &payload).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected() {
        let service = LoadTestConfigService::new(Arc::new(MemoryStore::new()));
        let config = service.post(&config()).await.unwrap();

        let payload = LoadTestConfigPayload {
            duration: Some(30),
            ..Default::default()
        };
        let err = service
            .apply_payload(&config.base.id, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ValidationFailed(_)));

        let stored = service.get(&config.base.id).await.unwrap().unwrap();
        assert_eq!(stored.duration, 0);
    }
}

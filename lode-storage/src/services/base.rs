use lode_core::{Entity, Validate};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::document::DocumentQuery;
use crate::error::{StorageError, StorageResult};
use crate::store::DocumentStore;

/// Reads and validated writes for one entity type
///
/// Every entity lives in the partition named after its type, so callers
/// only ever pass ids.
pub struct EntityService<T> {
    store: Arc<dyn DocumentStore>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityService<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> EntityService<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn partition_key() -> &'static str {
        T::ENTITY_TYPE.as_str()
    }

    pub async fn get(&self, id: &str) -> StorageResult<Option<T>> {
        Ok(self.get_with_etag(id).await?.map(|(entity, _)| entity))
    }

    /// Fetch an entity together with the etag a conditional write needs
    pub async fn get_with_etag(&self, id: &str) -> StorageResult<Option<(T, String)>> {
        match self.store.get_by_id(id, Self::partition_key()).await? {
            Some(document) => {
                let entity = document.to_entity()?;
                Ok(Some((entity, document.etag)))
            }
            None => Ok(None),
        }
    }

    /// All entities of this type, most recently written first
    pub async fn get_all(&self) -> StorageResult<Vec<T>> {
        self.query(DocumentQuery::of::<T>()).await
    }

    pub async fn get_most_recent(&self, limit: usize) -> StorageResult<Vec<T>> {
        self.query(DocumentQuery::of::<T>().limit(limit)).await
    }

    pub async fn count(&self) -> StorageResult<usize> {
        Ok(self.store.query(&DocumentQuery::of::<T>()).await?.len())
    }

    pub async fn query(&self, query: DocumentQuery) -> StorageResult<Vec<T>> {
        self.store
            .query(&query)
            .await?
            .iter()
            .map(|document| document.to_entity())
            .collect()
    }

    pub async fn delete(&self, id: &str) -> StorageResult<bool> {
        self.store.delete(id, Self::partition_key()).await
    }
}

impl<T: Entity + Validate> EntityService<T> {
    /// Validate and upsert
    pub async fn post(&self, entity: &T) -> StorageResult<T> {
        Ok(self.write(entity, None).await?.0)
    }

    /// Validate and replace only if the stored etag is still `etag`
    pub async fn replace_if_match(&self, entity: &T, etag: &str) -> StorageResult<(T, String)> {
        self.write(entity, Some(etag)).await
    }

    async fn write(&self, entity: &T, if_match: Option<&str>) -> StorageResult<(T, String)> {
        entity.validate()?;

        if entity.partition_key() != Self::partition_key() {
            return Err(StorageError::ValidationFailed(format!(
                "{} {} has partition key {}",
                T::ENTITY_TYPE,
                entity.id(),
                entity.partition_key()
            )));
        }

        let document = serde_json::to_value(entity)?;
        let stored = self
            .store
            .upsert(document, if_match.map(str::to_string))
            .await?;
        Ok((stored.to_entity()?, stored.etag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::StoredDocument;
    use crate::store::ChangeFeed;
    use async_trait::async_trait;
    use lode_core::{LoadClient, LoadTestConfig};
    use mockall::mock;
    use serde_json::Value;

    mock! {
        Store {}

        #[async_trait]
        impl DocumentStore for Store {
            async fn get_by_id(&self, id: &str, partition_key: &str) -> StorageResult<Option<StoredDocument>>;
            async fn upsert(&self, document: Value, if_match: Option<String>) -> StorageResult<StoredDocument>;
            async fn delete(&self, id: &str, partition_key: &str) -> StorageResult<bool>;
            async fn query(&self, query: &DocumentQuery) -> StorageResult<Vec<StoredDocument>>;
            async fn open_change_feed(&self) -> StorageResult<ChangeFeed>;
            async fn ping(&self) -> bool;
        }
    }

    #[tokio::test]
    async fn test_invalid_entity_never_reaches_store() {
        let mut store = MockStore::new();
        store.expect_upsert().times(0);

        let service = EntityService::<LoadTestConfig>::new(Arc::new(store));
        let err = service.post(&LoadTestConfig::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let mut store = MockStore::new();
        store
            .expect_get_by_id()
            .withf(|id, partition| id == "c1" && partition == "LoadClient")
            .returning(|_, _| Err(StorageError::ConnectionFailed("timeout".to_string())));

        let service = EntityService::<LoadClient>::new(Arc::new(store));
        let err = service.get("c1").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_documents_are_written_to_their_type_partition() {
        let mut store = MockStore::new();
        store
            .expect_upsert()
            .withf(|doc, if_match| doc["partitionKey"] == "LoadClient" && if_match.is_none())
            .times(1)
            .returning(|doc, _| {
                Ok(StoredDocument {
                    value: doc,
                    etag: "e1".to_string(),
                    ts: chrono::Utc::now(),
                    lsn: 1,
                })
            });

        let service = EntityService::<LoadClient>::new(Arc::new(store));
        let client = LoadClient::new("--mode Client");
        assert_eq!(service.post(&client).await.unwrap(), client);
    }
}

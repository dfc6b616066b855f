//! Typed change events

use lode_core::{ClientStatus, EntityType, LoadClient, LoadTestConfig, TestRun};
use lode_storage::StoredDocument;

use crate::error::{ChangeFeedError, ChangeFeedResult};

/// One changed document, decoded by its `entityType`
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    ClientStatus(ClientStatus),
    LoadClient(LoadClient),
    LoadTestConfig(LoadTestConfig),
    TestRun(TestRun),
}

impl ChangeEvent {
    /// Decode a raw change
    ///
    /// Documents without a routable entity type fail with
    /// [`ChangeFeedError::UnknownEntityType`]. `LoadResult` is embedded in
    /// TestRun and never routed on its own.
    pub fn from_document(document: &StoredDocument) -> ChangeFeedResult<Self> {
        let name = document.entity_type_name().unwrap_or_default();
        let entity_type = document
            .entity_type()
            .ok_or_else(|| ChangeFeedError::UnknownEntityType(name.to_string()))?;

        let decode = |e: lode_storage::StorageError| ChangeFeedError::Decode {
            entity_type: entity_type.to_string(),
            id: document.id().unwrap_or_default().to_string(),
            message: e.to_string(),
        };

        match entity_type {
            EntityType::ClientStatus => document.to_entity().map(Self::ClientStatus).map_err(decode),
            EntityType::LoadClient => document.to_entity().map(Self::LoadClient).map_err(decode),
            EntityType::LoadTestConfig => {
                document.to_entity().map(Self::LoadTestConfig).map_err(decode)
            }
            EntityType::TestRun => document.to_entity().map(Self::TestRun).map_err(decode),
            EntityType::LoadResult => Err(ChangeFeedError::UnknownEntityType(name.to_string())),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            ChangeEvent::ClientStatus(_) => EntityType::ClientStatus,
            ChangeEvent::LoadClient(_) => EntityType::LoadClient,
            ChangeEvent::LoadTestConfig(_) => EntityType::LoadTestConfig,
            ChangeEvent::TestRun(_) => EntityType::TestRun,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::ClientStatus(e) => &e.base.id,
            ChangeEvent::LoadClient(e) => &e.base.id,
            ChangeEvent::LoadTestConfig(e) => &e.base.id,
            ChangeEvent::TestRun(e) => &e.base.id,
        }
    }
}

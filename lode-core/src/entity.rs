//! Entity tags and the common document header

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Closed set of persisted document kinds
///
/// Every document carries its entity type, and its partition key equals the
/// type name. The change dispatcher routes on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    ClientStatus,
    LoadClient,
    LoadTestConfig,
    TestRun,
    LoadResult,
}

impl EntityType {
    /// Get the string representation, which is also the partition key
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::ClientStatus => "ClientStatus",
            EntityType::LoadClient => "LoadClient",
            EntityType::LoadTestConfig => "LoadTestConfig",
            EntityType::TestRun => "TestRun",
            EntityType::LoadResult => "LoadResult",
        }
    }

    /// Get all entity types
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::ClientStatus,
            EntityType::LoadClient,
            EntityType::LoadTestConfig,
            EntityType::TestRun,
            EntityType::LoadResult,
        ]
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::all()
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| CoreError::UnknownEntityType(s.to_string()))
    }
}

/// Worker status state machine: `Starting -> Ready <-> Testing -> Terminating`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ClientStatusType {
    #[default]
    Starting,
    Ready,
    Testing,
    Terminating,
}

impl ClientStatusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatusType::Starting => "Starting",
            ClientStatusType::Ready => "Ready",
            ClientStatusType::Testing => "Testing",
            ClientStatusType::Terminating => "Terminating",
        }
    }

    /// Whether the state machine permits moving to `next`
    ///
    /// Re-asserting the current status is always allowed so a worker can
    /// refresh its record. `Terminating` is absorbing.
    pub fn can_transition_to(&self, next: ClientStatusType) -> bool {
        use ClientStatusType::*;

        if *self == next {
            return true;
        }

        matches!(
            (self, next),
            (Starting, Ready)
                | (Starting, Terminating)
                | (Ready, Testing)
                | (Ready, Terminating)
                | (Testing, Ready)
                | (Testing, Terminating)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientStatusType::Terminating)
    }
}

impl fmt::Display for ClientStatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Header fields shared by every top-level document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityBase {
    pub id: String,
    pub partition_key: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub name: String,
}

impl EntityBase {
    /// Create a header with a fresh UUID identity
    pub fn new(entity_type: EntityType) -> Self {
        Self::with_id(entity_type, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            partition_key: entity_type.as_str().to_string(),
            entity_type,
            name: String::new(),
        }
    }
}

/// A top-level document the store can persist
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const ENTITY_TYPE: EntityType;

    fn base(&self) -> &EntityBase;

    fn id(&self) -> &str {
        &self.base().id
    }

    fn partition_key(&self) -> &str {
        &self.base().partition_key
    }

    /// Store-enforced expiry in seconds, if this entity uses one
    fn ttl(&self) -> Option<i64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_parse_is_case_insensitive() {
        assert_eq!("testrun".parse::<EntityType>().unwrap(), EntityType::TestRun);
        assert_eq!(
            "ClientStatus".parse::<EntityType>().unwrap(),
            EntityType::ClientStatus
        );
        assert!(matches!(
            "Unassigned".parse::<EntityType>(),
            Err(CoreError::UnknownEntityType(_))
        ));
    }

    #[test]
    fn test_entity_base_partition_key_matches_type() {
        let base = EntityBase::new(EntityType::LoadTestConfig);
        assert_eq!(base.partition_key, "LoadTestConfig");
        assert!(uuid::Uuid::parse_str(&base.id).is_ok());

        let json = serde_json::to_value(&base).unwrap();
        assert_eq!(json["entityType"], "LoadTestConfig");
        assert_eq!(json["partitionKey"], "LoadTestConfig");
    }

    #[test]
    fn test_status_transitions() {
        use ClientStatusType::*;

        assert!(Starting.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Testing));
        assert!(Testing.can_transition_to(Ready));
        assert!(Testing.can_transition_to(Terminating));
        assert!(Ready.can_transition_to(Ready));

        assert!(!Starting.can_transition_to(Testing));
        assert!(!Terminating.can_transition_to(Ready));
        assert!(!Terminating.can_transition_to(Starting));
        assert!(Terminating.can_transition_to(Terminating));
    }
}

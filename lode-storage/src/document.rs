//! Stored documents and query filters

use chrono::{DateTime, Utc};
use lode_core::{Entity, EntityType};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// A document as held by the store, with the metadata the store assigns
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// The entity JSON exactly as written
    pub value: Value,
    /// Changes on every write; used for conditional replaces
    pub etag: String,
    /// Time of the last write
    pub ts: DateTime<Utc>,
    /// Position of the last write in its partition's change log
    pub lsn: u64,
}

impl StoredDocument {
    pub fn id(&self) -> Option<&str> {
        self.value.get("id").and_then(Value::as_str)
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.value.get("partitionKey").and_then(Value::as_str)
    }

    /// Raw `entityType` property, if present
    pub fn entity_type_name(&self) -> Option<&str> {
        self.value.get("entityType").and_then(Value::as_str)
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        self.entity_type_name().and_then(|name| name.parse().ok())
    }

    /// Deserialize into a typed entity
    pub fn to_entity<T: DeserializeOwned>(&self) -> StorageResult<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

/// A single predicate over a document's JSON
#[derive(Debug, Clone, PartialEq)]
pub enum QueryFilter {
    /// Property at `path` equals `value`
    Eq { path: String, value: Value },
    /// Property at `path` is missing or null
    IsNull { path: String },
    /// Array at `path` holds an object whose `field` equals `value`
    ArrayContains {
        path: String,
        field: String,
        value: Value,
    },
}

impl QueryFilter {
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            QueryFilter::Eq { path, value } => lookup(document, path) == Some(value),
            QueryFilter::IsNull { path } => lookup(document, path).is_none_or(Value::is_null),
            QueryFilter::ArrayContains { path, field, value } => lookup(document, path)
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|item| item.get(field) == Some(value))),
        }
    }
}

/// Resolve a dotted property path such as `loadTestConfig.runLoop`
fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

/// Partition-scoped query, results ordered by last write, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub partition_key: String,
    pub filters: Vec<QueryFilter>,
    pub limit: Option<usize>,
}

impl DocumentQuery {
    pub fn partition(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            filters: Vec::new(),
            limit: None,
        }
    }

    /// All documents of one entity type
    pub fn of<T: Entity>() -> Self {
        Self::partition(T::ENTITY_TYPE.as_str())
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(QueryFilter::Eq {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_null(mut self, path: impl Into<String>) -> Self {
        self.filters.push(QueryFilter::IsNull { path: path.into() });
        self
    }

    pub fn array_contains(
        mut self,
        path: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(QueryFilter::ArrayContains {
            path: path.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.filters.iter().all(|filter| filter.matches(document))
    }
}

/// Pull `(id, partitionKey)` out of a document about to be written
pub(crate) fn document_key(document: &Value) -> StorageResult<(String, String)> {
    let id = document
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| StorageError::ValidationFailed("document has no id".to_string()))?;
    let partition_key = document
        .get("partitionKey")
        .and_then(Value::as_str)
        .filter(|pk| !pk.trim().is_empty())
        .ok_or_else(|| {
            StorageError::ValidationFailed(format!("document {} has no partitionKey", id))
        })?;

    Ok((id.to_string(), partition_key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run() -> Value {
        json!({
            "id": "run-1",
            "partitionKey": "TestRun",
            "entityType": "TestRun",
            "completedTime": null,
            "loadTestConfig": { "runLoop": true },
            "loadClients": [ { "id": "c1" }, { "id": "c2" } ]
        })
    }

    #[test]
    fn test_filters() {
        let doc = run();
        assert!(QueryFilter::Eq { path: "loadTestConfig.runLoop".into(), value: json!(true) }.matches(&doc));
        assert!(QueryFilter::IsNull { path: "completedTime".into() }.matches(&doc));
        assert!(QueryFilter::IsNull { path: "hardStopTime".into() }.matches(&doc));
        assert!(!QueryFilter::IsNull { path: "loadClients".into() }.matches(&doc));
    }

    #[test]
    fn test_array_contains() {
        let query = DocumentQuery::partition("TestRun").array_contains("loadClients", "id", "c2");
        assert!(query.matches(&run()));

        let query = DocumentQuery::partition("TestRun").array_contains("loadClients", "id", "c9");
        assert!(!query.matches(&run()));
    }

    #[test]
    fn test_document_key_requires_id_and_partition() {
        assert_eq!(
            document_key(&run()).unwrap(),
            ("run-1".to_string(), "TestRun".to_string())
        );
        assert!(document_key(&json!({"id": "x"})).is_err());
        assert!(document_key(&json!({"partitionKey": "TestRun"})).is_err());
    }
}

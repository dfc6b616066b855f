//! Core error types for LodeRunner

use thiserror::Error;

use crate::entity::{ClientStatusType, EntityType};

/// Core error type for domain operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity failed one or more validation rules
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Status change not permitted by the client status state machine
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ClientStatusType,
        to: ClientStatusType,
    },

    /// A result was offered by a client the test run never assigned
    #[error("Load client {client_id} is not assigned to test run {test_run_id}")]
    UnassignedClient {
        test_run_id: String,
        client_id: String,
    },

    /// Unrecognised entity type tag
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Validation failure for a single entity, carrying every broken rule
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{entity_type} validation failed: {}", errors.join("; "))]
pub struct ValidationError {
    pub entity_type: EntityType,
    pub errors: Vec<String>,
}

impl ValidationError {
    pub fn new(entity_type: EntityType, errors: Vec<String>) -> Self {
        Self {
            entity_type,
            errors,
        }
    }

    /// Whether any error message mentions the given field
    pub fn has_field(&self, field: &str) -> bool {
        self.errors
            .iter()
            .any(|e| e.split(" - ").next() == Some(field))
    }
}

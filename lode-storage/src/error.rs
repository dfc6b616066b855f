//! Storage error types

use lode_resilience::Retryable;
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store cannot be reached
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution errors
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Document not found
    #[error("Document not found")]
    NotFound,

    /// Entity rejected by validation before the write
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Conditional write lost against a newer version
    #[error("Concurrency error: {0}")]
    ConcurrencyError(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic storage errors
    #[error("Storage error: {0}")]
    Other(String),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Clone for StorageError {
    fn clone(&self) -> Self {
        match self {
            StorageError::ConnectionFailed(msg) => StorageError::ConnectionFailed(msg.clone()),
            StorageError::QueryFailed(msg) => StorageError::QueryFailed(msg.clone()),
            StorageError::NotFound => StorageError::NotFound,
            StorageError::ValidationFailed(msg) => StorageError::ValidationFailed(msg.clone()),
            StorageError::ConcurrencyError(msg) => StorageError::ConcurrencyError(msg.clone()),
            StorageError::SerializationError(msg) => StorageError::SerializationError(msg.clone()),
            StorageError::Other(msg) => StorageError::Other(msg.clone()),
            StorageError::Json(err) => StorageError::SerializationError(err.to_string()),
        }
    }
}

impl StorageError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionFailed(_) | StorageError::ConcurrencyError(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::ConcurrencyError(_))
    }

    /// Get error code for logs and API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::NotFound => "NOT_FOUND",
            StorageError::ValidationFailed(_) => "VALIDATION_ERROR",
            StorageError::ConnectionFailed(_) => "CONNECTION_ERROR",
            StorageError::QueryFailed(_) => "QUERY_ERROR",
            StorageError::ConcurrencyError(_) => "CONCURRENCY_ERROR",
            StorageError::SerializationError(_) | StorageError::Json(_) => "SERIALIZATION_ERROR",
            StorageError::Other(_) => "STORAGE_ERROR",
        }
    }
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        StorageError::is_retryable(self)
    }

    fn is_transient(&self) -> bool {
        self.is_conflict()
    }
}

impl From<lode_core::ValidationError> for StorageError {
    fn from(err: lode_core::ValidationError) -> Self {
        StorageError::ValidationFailed(err.to_string())
    }
}

impl From<lode_core::CoreError> for StorageError {
    fn from(err: lode_core::CoreError) -> Self {
        match err {
            lode_core::CoreError::Validation(e) => e.into(),
            lode_core::CoreError::Serialization(e) => StorageError::Json(e),
            other => StorageError::ValidationFailed(other.to_string()),
        }
    }
}

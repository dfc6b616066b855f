//! Worker error types

use lode_changefeed::ChangeFeedError;
use lode_core::CoreError;
use lode_engine::EngineError;
use lode_storage::StorageError;
use thiserror::Error;

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Change feed error: {0}")]
    ChangeFeed(#[from] ChangeFeedError),

    #[error("Load test error: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Worker is shutting down")]
    ShuttingDown,
}

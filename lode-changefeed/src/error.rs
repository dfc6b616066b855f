use lode_storage::StorageError;
use thiserror::Error;

pub type ChangeFeedResult<T> = std::result::Result<T, ChangeFeedError>;

#[derive(Debug, Error)]
pub enum ChangeFeedError {
    #[error("Change feed store error: {0}")]
    Storage(#[from] StorageError),

    #[error("Dispatcher {0} is already started")]
    AlreadyStarted(String),

    #[error("Unassigned entity type: {0}")]
    UnknownEntityType(String),

    #[error("Cannot decode {entity_type} document {id}: {message}")]
    Decode {
        entity_type: String,
        id: String,
        message: String,
    },
}

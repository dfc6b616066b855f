//! Store interfaces the core depends on

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::document::{DocumentQuery, StoredDocument};
use crate::error::StorageResult;

/// Document CRUD, queries and the change feed
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_by_id(&self, id: &str, partition_key: &str) -> StorageResult<Option<StoredDocument>>;

    /// Insert or replace a document
    ///
    /// With `if_match`, the write only succeeds when the stored document
    /// still carries that etag; otherwise it fails with
    /// [`crate::StorageError::ConcurrencyError`].
    async fn upsert(&self, document: Value, if_match: Option<String>) -> StorageResult<StoredDocument>;

    /// Remove a document, returns false when it did not exist
    async fn delete(&self, id: &str, partition_key: &str) -> StorageResult<bool>;

    async fn query(&self, query: &DocumentQuery) -> StorageResult<Vec<StoredDocument>>;

    async fn open_change_feed(&self) -> StorageResult<ChangeFeed>;

    /// Connectivity probe
    async fn ping(&self) -> bool;
}

/// Ordered per-partition mutation log
///
/// Like a latest-version feed, only the newest write of each document is
/// guaranteed to be observed; earlier writes may be compacted away.
#[async_trait]
pub trait ChangeFeedSource: Send + Sync {
    async fn partitions(&self) -> StorageResult<Vec<String>>;

    /// Up to `max` changes with an lsn greater than `after_lsn`, in log order
    async fn read_changes(
        &self,
        partition: &str,
        after_lsn: Option<u64>,
        max: usize,
    ) -> StorageResult<Vec<StoredDocument>>;

    /// Lsn of the newest change in `partition`
    async fn latest_lsn(&self, partition: &str) -> StorageResult<Option<u64>>;
}

/// Ownership of one change feed partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub partition: String,
    pub owner: String,
    /// Last lsn the owner finished processing
    pub checkpoint: Option<u64>,
}

/// Partition leases and their checkpoints
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take `partition` for `owner`; `None` while another owner's lease is live
    async fn acquire(
        &self,
        partition: &str,
        owner: &str,
        duration: Duration,
    ) -> StorageResult<Option<Lease>>;

    /// Extend a held lease; false when it has been lost
    async fn renew(&self, partition: &str, owner: &str, duration: Duration) -> StorageResult<bool>;

    async fn release(&self, partition: &str, owner: &str) -> StorageResult<()>;

    /// Record progress; false when the lease has been lost
    async fn checkpoint(&self, partition: &str, owner: &str, lsn: u64) -> StorageResult<bool>;
}

/// Handles returned by [`DocumentStore::open_change_feed`]
#[derive(Clone)]
pub struct ChangeFeed {
    pub source: Arc<dyn ChangeFeedSource>,
    pub leases: Arc<dyn LeaseStore>,
}

//! Storage abstraction for LodeRunner
//!
//! The control plane and the workers share one document store. This crate
//! defines the narrow store interface the core relies on (point reads,
//! conditional upserts, queries, a leased per-partition change feed and a
//! connectivity probe), an in-memory implementation with TTL expiry, and
//! typed services that validate entities before they are written.

pub mod document;
pub mod error;
pub mod memory;
pub mod services;
pub mod store;

pub use document::{DocumentQuery, QueryFilter, StoredDocument};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use services::{
    ClientStatusService, EntityService, LoadTestConfigService, TestRunService,
};
pub use store::{ChangeFeed, ChangeFeedSource, DocumentStore, Lease, LeaseStore};

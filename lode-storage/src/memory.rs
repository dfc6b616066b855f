//! In-memory document store
//!
//! Holds documents, per-partition change logs and leases behind
//! `parking_lot` locks. Documents carrying a positive `ttl` property expire
//! that many seconds after their last write: they stop being visible at
//! once and are physically removed by [`MemoryStore::cleanup_expired`].
//!
//! Change logs are compacted per document: only the latest write of each
//! id is kept, and deleted or expired documents leave the log.

use async_trait::async_trait;
use chrono::Utc;
use lode_core::EntityType;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::document::{document_key, DocumentQuery, StoredDocument};
use crate::error::{StorageError, StorageResult};
use crate::store::{ChangeFeed, ChangeFeedSource, DocumentStore, Lease, LeaseStore};

struct Entry {
    document: StoredDocument,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Latest change per id, ordered by lsn
#[derive(Default)]
struct PartitionLog {
    changes: BTreeMap<u64, StoredDocument>,
    lsn_by_id: HashMap<String, u64>,
}

impl PartitionLog {
    fn record(&mut self, id: String, document: StoredDocument) {
        if let Some(previous) = self.lsn_by_id.insert(id, document.lsn) {
            self.changes.remove(&previous);
        }
        self.changes.insert(document.lsn, document);
    }

    fn forget(&mut self, id: &str) {
        if let Some(lsn) = self.lsn_by_id.remove(id) {
            self.changes.remove(&lsn);
        }
    }
}

#[derive(Default)]
struct StoreState {
    /// Keyed by (partition key, id)
    documents: HashMap<(String, String), Entry>,
    logs: BTreeMap<String, PartitionLog>,
    last_lsn: u64,
}

struct LeaseEntry {
    owner: Option<String>,
    expires_at: Instant,
    checkpoint: Option<u64>,
}

impl LeaseEntry {
    fn is_held_by_other(&self, owner: &str, now: Instant) -> bool {
        match &self.owner {
            Some(current) => current != owner && now < self.expires_at,
            None => false,
        }
    }
}

struct Inner {
    state: RwLock<StoreState>,
    leases: Mutex<HashMap<String, LeaseEntry>>,
    available: AtomicBool,
}

/// Cheaply cloneable in-memory store; clones share the same data
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Store with one partition per entity type
    pub fn new() -> Self {
        Self::with_partitions(EntityType::all().iter().map(|t| t.as_str().to_string()))
    }

    pub fn with_partitions(partitions: impl IntoIterator<Item = String>) -> Self {
        let mut state = StoreState::default();
        for partition in partitions {
            state.logs.entry(partition).or_default();
        }

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                leases: Mutex::new(HashMap::new()),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate losing or regaining the connection
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Number of live documents
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .state
            .read()
            .documents
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current owner of a partition lease, ignoring expiry
    pub fn lease_owner(&self, partition: &str) -> Option<String> {
        self.inner
            .leases
            .lock()
            .get(partition)
            .and_then(|lease| lease.owner.clone())
    }

    /// Number of changes retained across all partition logs
    pub fn change_log_len(&self) -> usize {
        self.inner
            .state
            .read()
            .logs
            .values()
            .map(|log| log.changes.len())
            .sum()
    }

    /// Remove expired documents and their changes, returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.state.write();
        let expired: Vec<(String, String)> = state
            .documents
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.documents.remove(key);
            let (partition_key, id) = key;
            if let Some(log) = state.logs.get_mut(partition_key) {
                log.forget(id);
            }
        }
        let removed = expired.len();

        if removed > 0 {
            tracing::debug!(removed, "Removed expired documents");
        }
        removed
    }

    /// Start a background cleanup task
    pub fn start_cleanup_task(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        store.cleanup_expired();
                    }
                }
            }
        })
    }

    fn ensure_available(&self) -> StorageResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StorageError::ConnectionFailed("store is unavailable".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_by_id(&self, id: &str, partition_key: &str) -> StorageResult<Option<StoredDocument>> {
        self.ensure_available()?;

        let now = Instant::now();
        let state = self.inner.state.read();
        Ok(state
            .documents
            .get(&(partition_key.to_string(), id.to_string()))
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.document.clone()))
    }

    async fn upsert(&self, document: Value, if_match: Option<String>) -> StorageResult<StoredDocument> {
        self.ensure_available()?;

        let (id, partition_key) = document_key(&document)?;
        let ttl = document
            .get("ttl")
            .and_then(Value::as_i64)
            .filter(|ttl| *ttl > 0);

        let now = Instant::now();
        let mut state = self.inner.state.write();
        let key = (partition_key.clone(), id.clone());

        if let Some(expected) = if_match {
            match state.documents.get(&key).filter(|entry| !entry.is_expired(now)) {
                None => return Err(StorageError::NotFound),
                Some(entry) if entry.document.etag != expected => {
                    return Err(StorageError::ConcurrencyError(format!(
                        "{}/{} was modified concurrently",
                        partition_key, id
                    )));
                }
                Some(_) => {}
            }
        }

        state.last_lsn += 1;
        let stored = StoredDocument {
            value: document,
            etag: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            lsn: state.last_lsn,
        };

        state
            .logs
            .entry(partition_key)
            .or_default()
            .record(id, stored.clone());
        state.documents.insert(
            key,
            Entry {
                document: stored.clone(),
                expires_at: ttl.map(|secs| now + Duration::from_secs(secs as u64)),
            },
        );

        Ok(stored)
    }

    async fn delete(&self, id: &str, partition_key: &str) -> StorageResult<bool> {
        self.ensure_available()?;

        let now = Instant::now();
        let mut state = self.inner.state.write();
        let removed = state
            .documents
            .remove(&(partition_key.to_string(), id.to_string()));
        if let Some(log) = state.logs.get_mut(partition_key) {
            log.forget(id);
        }
        Ok(removed.is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn query(&self, query: &DocumentQuery) -> StorageResult<Vec<StoredDocument>> {
        self.ensure_available()?;

        let now = Instant::now();
        let state = self.inner.state.read();
        let mut results: Vec<StoredDocument> = state
            .documents
            .iter()
            .filter(|((partition_key, _), entry)| {
                *partition_key == query.partition_key
                    && !entry.is_expired(now)
                    && query.matches(&entry.document.value)
            })
            .map(|(_, entry)| entry.document.clone())
            .collect();

        // lsn is assigned in write order, so it breaks timestamp ties
        results.sort_by(|a, b| b.ts.cmp(&a.ts).then(b.lsn.cmp(&a.lsn)));
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }

        Ok(results)
    }

    async fn open_change_feed(&self) -> StorageResult<ChangeFeed> {
        self.ensure_available()?;

        Ok(ChangeFeed {
            source: Arc::new(self.clone()),
            leases: Arc::new(self.clone()),
        })
    }

    async fn ping(&self) -> bool {
        self.is_available()
    }
}

#[async_trait]
impl ChangeFeedSource for MemoryStore {
    async fn partitions(&self) -> StorageResult<Vec<String>> {
        self.ensure_available()?;
        Ok(self.inner.state.read().logs.keys().cloned().collect())
    }

    async fn read_changes(
        &self,
        partition: &str,
        after_lsn: Option<u64>,
        max: usize,
    ) -> StorageResult<Vec<StoredDocument>> {
        self.ensure_available()?;

        let state = self.inner.state.read();
        let Some(log) = state.logs.get(partition) else {
            return Ok(Vec::new());
        };

        let changes: Vec<StoredDocument> = match after_lsn {
            Some(lsn) => log
                .changes
                .range((Bound::Excluded(lsn), Bound::Unbounded))
                .take(max)
                .map(|(_, doc)| doc.clone())
                .collect(),
            None => log.changes.values().take(max).cloned().collect(),
        };
        Ok(changes)
    }

    async fn latest_lsn(&self, partition: &str) -> StorageResult<Option<u64>> {
        self.ensure_available()?;
        Ok(self
            .inner
            .state
            .read()
            .logs
            .get(partition)
            .and_then(|log| log.changes.keys().next_back().copied()))
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn acquire(
        &self,
        partition: &str,
        owner: &str,
        duration: Duration,
    ) -> StorageResult<Option<Lease>> {
        self.ensure_available()?;

        let now = Instant::now();
        let mut leases = self.inner.leases.lock();
        let entry = leases.entry(partition.to_string()).or_insert(LeaseEntry {
            owner: None,
            expires_at: now,
            checkpoint: None,
        });

        if entry.is_held_by_other(owner, now) {
            return Ok(None);
        }

        entry.owner = Some(owner.to_string());
        entry.expires_at = now + duration;

        Ok(Some(Lease {
            partition: partition.to_string(),
            owner: owner.to_string(),
            checkpoint: entry.checkpoint,
        }))
    }

    async fn renew(&self, partition: &str, owner: &str, duration: Duration) -> StorageResult<bool> {
        self.ensure_available()?;

        let mut leases = self.inner.leases.lock();
        match leases.get_mut(partition) {
            Some(entry) if entry.owner.as_deref() == Some(owner) => {
                entry.expires_at = Instant::now() + duration;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, partition: &str, owner: &str) -> StorageResult<()> {
        self.ensure_available()?;

        if let Some(entry) = self.inner.leases.lock().get_mut(partition) {
            if entry.owner.as_deref() == Some(owner) {
                entry.owner = None;
            }
        }
        Ok(())
    }

    async fn checkpoint(&self, partition: &str, owner: &str, lsn: u64) -> StorageResult<bool> {
        self.ensure_available()?;

        let mut leases = self.inner.leases.lock();
        match leases.get_mut(partition) {
            Some(entry) if entry.owner.as_deref() == Some(owner) => {
                entry.checkpoint = Some(entry.checkpoint.map_or(lsn, |current| current.max(lsn)));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

//! The memory store interface and its in-process implementation.
//!
//! Backends guarantee per-record atomic writes only. Callers that update
//! several records must make each write idempotent.

use crate::error::{Error, Result};
use crate::types::{MemoryFilter, MemoryLink, MemoryRecord, RecordId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Key-value / search interface over stored memory.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Return records matching `filter`, most recently updated first.
    async fn query(&self, filter: &MemoryFilter) -> Result<Vec<MemoryRecord>>;

    /// Insert or replace a record, returning its id.
    async fn write(&self, record: MemoryRecord) -> Result<RecordId>;

    /// Create or re-weight a link from `from` to `to`.
    async fn link(&self, from: RecordId, to: RecordId, weight: f64) -> Result<()>;

    /// Fetch a record by id.
    async fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;
}

/// Sort newest-first, apply the limit.
pub(crate) fn finish_query(mut records: Vec<MemoryRecord>, filter: &MemoryFilter) -> Vec<MemoryRecord> {
    records.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    if let Some(limit) = filter.limit {
        records.truncate(limit);
    }
    records
}

/// Upsert a link into a record's link list.
pub(crate) fn upsert_link(links: &mut Vec<MemoryLink>, target: RecordId, weight: f64) {
    let weight = weight.clamp(0.0, 1.0);
    match links.iter_mut().find(|l| l.target == target) {
        Some(existing) => existing.weight = weight,
        None => links.push(MemoryLink { target, weight }),
    }
}

/// Process-local store backed by a `RwLock<HashMap>`.
///
/// Reads share the lock, so concurrent queries never wait on each other.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<RecordId, MemoryRecord>>,
    queries: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `query` calls served so far.
    #[must_use]
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn query(&self, filter: &MemoryFilter) -> Result<Vec<MemoryRecord>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let records = self.records.read().await;
        let matched: Vec<MemoryRecord> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(finish_query(matched, filter))
    }

    async fn write(&self, mut record: MemoryRecord) -> Result<RecordId> {
        let id = record.id;
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&id) {
            record.created_at = existing.created_at;
        }
        record.updated_at = Utc::now();
        records.insert(id, record);
        debug!(record_id = %id, "memory record written");
        Ok(id)
    }

    async fn link(&self, from: RecordId, to: RecordId, weight: f64) -> Result<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&to) {
            return Err(Error::NotFound(to));
        }
        let source = records.get_mut(&from).ok_or(Error::NotFound(from))?;
        upsert_link(&mut source.links, to, weight);
        Ok(())
    }

    async fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

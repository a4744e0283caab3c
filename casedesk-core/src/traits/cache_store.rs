//! Persistent cache tier abstraction Trait

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::CoreResult;
use crate::types::{CacheRecord, Partition};

/// Persistent cache store Trait
///
/// A transactional key-value store with independent partitions. Ordered
/// iteration by last access backs LRU eviction, iteration by tenant backs
/// scoped invalidation.
///
/// Platform implementation:
/// - `InMemoryCacheStore` (this crate)
/// - `SqliteStore` (`casedesk-app`, sea-orm)
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Insert or replace a record keyed by `(record.partition, record.key)`
    async fn put(&self, record: CacheRecord) -> CoreResult<()>;

    /// Get a record by key
    async fn get(&self, partition: Partition, key: &str) -> CoreResult<Option<CacheRecord>>;

    /// Update the last access time of a record; no-op when it is absent
    async fn touch(&self, partition: Partition, key: &str, at: DateTime<Utc>) -> CoreResult<()>;

    /// Delete a record; no-op when it is absent
    async fn delete(&self, partition: Partition, key: &str) -> CoreResult<()>;

    /// Delete a batch of records in one transaction
    async fn delete_many(&self, partition: Partition, keys: &[String]) -> CoreResult<()>;

    /// Number of records in a partition
    async fn count(&self, partition: Partition) -> CoreResult<u64>;

    /// Up to `limit` keys, least recently accessed first
    async fn oldest_keys(&self, partition: Partition, limit: u64) -> CoreResult<Vec<String>>;

    /// All keys that belong to a tenant
    async fn keys_for_tenant(&self, partition: Partition, tenant_id: &str)
        -> CoreResult<Vec<String>>;

    /// Remove every record of a partition
    async fn clear(&self, partition: Partition) -> CoreResult<()>;
}

struct StoredRecord {
    record: CacheRecord,
    /// Write order, breaks last-access ties
    seq: u64,
}

#[derive(Default)]
struct Partitions {
    records: HashMap<(Partition, String), StoredRecord>,
    next_seq: u64,
}

impl Partitions {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// In-memory cache store
///
/// Used when no durable storage is available and as the reference
/// behavior for durable adapters.
#[derive(Clone, Default)]
pub struct InMemoryCacheStore {
    inner: Arc<RwLock<Partitions>>,
}

impl InMemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn put(&self, record: CacheRecord) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let seq = inner.bump();
        inner
            .records
            .insert((record.partition, record.key.clone()), StoredRecord { record, seq });
        Ok(())
    }

    async fn get(&self, partition: Partition, key: &str) -> CoreResult<Option<CacheRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .get(&(partition, key.to_string()))
            .map(|stored| stored.record.clone()))
    }

    async fn touch(&self, partition: Partition, key: &str, at: DateTime<Utc>) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let seq = inner.bump();
        if let Some(stored) = inner.records.get_mut(&(partition, key.to_string())) {
            stored.record.last_access = at;
            stored.seq = seq;
        }
        Ok(())
    }

    async fn delete(&self, partition: Partition, key: &str) -> CoreResult<()> {
        self.inner
            .write()
            .await
            .records
            .remove(&(partition, key.to_string()));
        Ok(())
    }

    async fn delete_many(&self, partition: Partition, keys: &[String]) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        for key in keys {
            inner.records.remove(&(partition, key.clone()));
        }
        Ok(())
    }

    async fn count(&self, partition: Partition) -> CoreResult<u64> {
        let inner = self.inner.read().await;
        let count = inner
            .records
            .keys()
            .filter(|(p, _)| *p == partition)
            .count();
        Ok(count as u64)
    }

    async fn oldest_keys(&self, partition: Partition, limit: u64) -> CoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<_> = inner
            .records
            .values()
            .filter(|stored| stored.record.partition == partition)
            .map(|stored| (stored.record.last_access, stored.seq, stored.record.key.clone()))
            .collect();
        entries.sort();
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(entries.into_iter().take(limit).map(|(_, _, key)| key).collect())
    }

    async fn keys_for_tenant(
        &self,
        partition: Partition,
        tenant_id: &str,
    ) -> CoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .values()
            .filter(|stored| {
                stored.record.partition == partition && stored.record.tenant_id == tenant_id
            })
            .map(|stored| stored.record.key.clone())
            .collect())
    }

    async fn clear(&self, partition: Partition) -> CoreResult<()> {
        self.inner
            .write()
            .await
            .records
            .retain(|(p, _), _| *p != partition);
        Ok(())
    }
}

//! Tiered object cache
//!
//! Three tiers, checked in order:
//! 1. a widget-local map owned by a [`CacheScope`]
//! 2. the page-wide map shared by every clone of [`TieredCache`]
//! 3. the persistent [`CacheStore`], compressed and LRU-bounded per partition
//!
//! Misses that go to the network are de-duplicated per physical key. The
//! persistent tier is an optimization only: its failures degrade to a miss
//! on read and a no-op on write.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CacheConfig;
use crate::error::{CoreError, CoreResult};
use crate::services::codec::PayloadCodec;
use crate::services::tenant::TenantResolver;
use crate::traits::{CacheStore, Clock};
use crate::types::{CacheRecord, Partition};

type MemoryKey = (Partition, String);
type SharedFetch = Shared<BoxFuture<'static, CoreResult<Arc<Value>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn within_ttl(created_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now - created_at <= ttl,
        Err(_) => true,
    }
}

fn decode_value<T: DeserializeOwned>(value: &Value, key: &str) -> Option<T> {
    match T::deserialize(value) {
        Ok(typed) => Some(typed),
        Err(e) => {
            log::warn!("[cache] Cached value for {key} has unexpected shape: {e}");
            None
        }
    }
}

#[derive(Clone)]
struct MemoryEntry {
    value: Arc<Value>,
    tenant_id: String,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryTier {
    entries: Mutex<HashMap<MemoryKey, MemoryEntry>>,
}

impl MemoryTier {
    /// Fresh entry for `key`. Stale entries are dropped.
    fn get_fresh(&self, key: &MemoryKey, now: DateTime<Utc>, ttl: Duration) -> Option<MemoryEntry> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if within_ttl(entry.created_at, now, ttl) => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: MemoryKey, entry: MemoryEntry) {
        lock(&self.entries).insert(key, entry);
    }

    fn remove(&self, key: &MemoryKey) {
        lock(&self.entries).remove(key);
    }

    fn remove_many(&self, partition: Partition, keys: &[String]) {
        let mut entries = lock(&self.entries);
        for key in keys {
            entries.remove(&(partition, key.clone()));
        }
    }

    fn remove_tenant(&self, partition: Partition, tenant_id: &str) {
        lock(&self.entries).retain(|(p, _), entry| !(*p == partition && entry.tenant_id == tenant_id));
    }
}

struct Inner {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    codec: PayloadCodec,
    resolver: TenantResolver,
    shared: MemoryTier,
    in_flight: Mutex<HashMap<MemoryKey, SharedFetch>>,
    /// Serializes eviction passes so concurrent writers do not over-delete
    eviction: tokio::sync::Mutex<()>,
}

/// Page-wide tiered cache
///
/// Clones share the page-wide tier, the store and the in-flight registry.
/// Use [`TieredCache::scope`] to get a handle with its own local tier.
///
/// Hits in either memory tier return without touching the persistent
/// record. LRU order in the store therefore follows persistent reads and
/// writes only; a key served from memory ages there as if unread.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<Inner>,
}

/// Widget-scoped view of a [`TieredCache`] with its own local tier.
pub struct CacheScope {
    cache: TieredCache,
    local: MemoryTier,
}

/// Per-partition entry counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub reference_entries: u64,
    pub execution_entries: u64,
}

impl TieredCache {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                codec: PayloadCodec::from_config(&config),
                config,
                resolver: TenantResolver::new(),
                shared: MemoryTier::default(),
                in_flight: Mutex::new(HashMap::new()),
                eviction: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// New handle with an empty widget-local tier.
    #[must_use]
    pub fn scope(&self) -> CacheScope {
        CacheScope {
            cache: self.clone(),
            local: MemoryTier::default(),
        }
    }

    /// Tenant resolution state, fed by the UI layer.
    #[must_use]
    pub fn tenants(&self) -> &TenantResolver {
        &self.inner.resolver
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        partition: Partition,
        tenant: Option<&str>,
        key: &str,
        ttl: Option<Duration>,
    ) -> Option<T> {
        self.inner.get(None, partition, tenant, key, ttl).await
    }

    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        partition: Partition,
        tenant: Option<&str>,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> CoreResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        self.inner
            .get_or_fetch(None, partition, tenant, key, ttl, fetch)
            .await
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        partition: Partition,
        tenant: Option<&str>,
        key: &str,
        value: &T,
    ) -> CoreResult<()> {
        self.inner.set(None, partition, tenant, key, value).await
    }

    pub async fn remove(&self, partition: Partition, tenant: Option<&str>, key: &str) -> CoreResult<()> {
        self.inner.remove(None, partition, tenant, key).await
    }

    /// Drop every entry a tenant owns in `partition`. Returns the number of
    /// persisted entries removed.
    pub async fn invalidate_tenant(&self, partition: Partition, tenant: Option<&str>) -> u64 {
        self.inner.invalidate_tenant(None, partition, tenant).await
    }

    /// Persisted entries in `partition`; 0 when the store is unavailable.
    pub async fn entry_count(&self, partition: Partition) -> u64 {
        match self.inner.store.count(partition).await {
            Ok(count) => count,
            Err(e) => {
                log::warn!("[cache] Failed to count {partition} entries: {e}");
                0
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            reference_entries: self.entry_count(Partition::Reference).await,
            execution_entries: self.entry_count(Partition::Execution).await,
        }
    }
}

impl CacheScope {
    /// The page-wide cache this scope reads through to.
    #[must_use]
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        partition: Partition,
        tenant: Option<&str>,
        key: &str,
        ttl: Option<Duration>,
    ) -> Option<T> {
        self.cache
            .inner
            .get(Some(&self.local), partition, tenant, key, ttl)
            .await
    }

    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        partition: Partition,
        tenant: Option<&str>,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> CoreResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        self.cache
            .inner
            .get_or_fetch(Some(&self.local), partition, tenant, key, ttl, fetch)
            .await
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        partition: Partition,
        tenant: Option<&str>,
        key: &str,
        value: &T,
    ) -> CoreResult<()> {
        self.cache
            .inner
            .set(Some(&self.local), partition, tenant, key, value)
            .await
    }

    pub async fn remove(&self, partition: Partition, tenant: Option<&str>, key: &str) -> CoreResult<()> {
        self.cache
            .inner
            .remove(Some(&self.local), partition, tenant, key)
            .await
    }

    pub async fn invalidate_tenant(&self, partition: Partition, tenant: Option<&str>) -> u64 {
        self.cache
            .inner
            .invalidate_tenant(Some(&self.local), partition, tenant)
            .await
    }
}

impl Inner {
    fn capacity(&self, partition: Partition) -> Option<u64> {
        match partition {
            Partition::Execution => Some(self.config.execution_capacity),
            Partition::Reference => self.config.reference_capacity,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        local: Option<&MemoryTier>,
        partition: Partition,
        tenant: Option<&str>,
        key: &str,
        ttl: Option<Duration>,
    ) -> Option<T> {
        let (tenant_id, physical) = match self.resolver.physical_key(tenant, key) {
            Ok(resolved) => resolved,
            Err(e) => {
                log::warn!("[cache] {e}");
                return None;
            }
        };
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());

        if let Some(value) = self.lookup(local, partition, &physical, ttl).await {
            return decode_value(&value, &physical);
        }

        // A fetch for this key is outbound: observe its result
        let pending = lock(&self.in_flight).get(&(partition, physical.clone())).cloned();
        let value = pending?.await.ok()?;
        if let Some(local) = local {
            self.fill_local(local, partition, &tenant_id, &physical, &value);
        }
        decode_value(&value, &physical)
    }

    /// Memory tiers, then the persistent store.
    async fn lookup(
        &self,
        local: Option<&MemoryTier>,
        partition: Partition,
        physical: &str,
        ttl: Duration,
    ) -> Option<Arc<Value>> {
        let now = self.clock.now();
        let memory_key = (partition, physical.to_string());

        if let Some(entry) = local.and_then(|tier| tier.get_fresh(&memory_key, now, ttl)) {
            return Some(entry.value);
        }

        if let Some(entry) = self.shared.get_fresh(&memory_key, now, ttl) {
            if let Some(local) = local {
                local.insert(memory_key, entry.clone());
            }
            return Some(entry.value);
        }

        let record = match self.store.get(partition, physical).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("[cache] Persistent read of {physical} failed, treating as miss: {e}");
                return None;
            }
        };

        if !within_ttl(record.created_at, now, ttl) {
            log::debug!("[cache] {physical} is stale");
            return None;
        }

        let value: Value = match self.codec.decode(&record.payload, record.compressed) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("[cache] Failed to decode {physical}, treating as miss: {e}");
                return None;
            }
        };

        if let Err(e) = self.store.touch(partition, physical, now).await {
            log::warn!("[cache] Failed to update last access of {physical}: {e}");
        }

        let entry = MemoryEntry {
            value: Arc::new(value),
            tenant_id: record.tenant_id,
            created_at: record.created_at,
        };
        self.shared.insert(memory_key.clone(), entry.clone());
        if let Some(local) = local {
            local.insert(memory_key, entry.clone());
        }
        Some(entry.value)
    }

    async fn get_or_fetch<T, F, Fut>(
        self: &Arc<Self>,
        local: Option<&MemoryTier>,
        partition: Partition,
        tenant: Option<&str>,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> CoreResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        let (tenant_id, physical) = self.resolver.physical_key(tenant, key)?;
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());

        if let Some(value) = self.lookup(local, partition, &physical, ttl).await {
            if let Some(typed) = decode_value(&value, &physical) {
                return Ok(typed);
            }
        }

        let pending = {
            let mut registry = lock(&self.in_flight);
            let memory_key = (partition, physical.clone());
            if let Some(existing) = registry.get(&memory_key) {
                log::debug!("[cache] Joining in-flight fetch for {physical}");
                existing.clone()
            } else {
                let inner = Arc::clone(self);
                let request = fetch();
                let tenant_id = tenant_id.clone();
                let key = physical.clone();
                let pending = async move {
                    let result: CoreResult<Arc<Value>> = async {
                        let fetched = request.await?;
                        let value = serde_json::to_value(&fetched)
                            .map_err(|e| CoreError::SerializationError(e.to_string()))?;
                        let value = Arc::new(value);
                        if let Err(e) = inner
                            .write(partition, &tenant_id, &key, Arc::clone(&value))
                            .await
                        {
                            log::warn!("[cache] Fetched value for {key} not cached: {e}");
                        }
                        Ok(value)
                    }
                    .await;
                    lock(&inner.in_flight).remove(&(partition, key));
                    result
                }
                .boxed()
                .shared();
                registry.insert(memory_key, pending.clone());
                pending
            }
        };

        let value = pending.await?;
        if let Some(local) = local {
            self.fill_local(local, partition, &tenant_id, &physical, &value);
        }
        T::deserialize(value.as_ref()).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    fn fill_local(
        &self,
        local: &MemoryTier,
        partition: Partition,
        tenant_id: &str,
        physical: &str,
        value: &Arc<Value>,
    ) {
        let memory_key = (partition, physical.to_string());
        let entry = lock(&self.shared.entries)
            .get(&memory_key)
            .cloned()
            .unwrap_or_else(|| MemoryEntry {
                value: Arc::clone(value),
                tenant_id: tenant_id.to_string(),
                created_at: self.clock.now(),
            });
        local.insert(memory_key, entry);
    }

    async fn set<T: Serialize + ?Sized>(
        &self,
        local: Option<&MemoryTier>,
        partition: Partition,
        tenant: Option<&str>,
        key: &str,
        value: &T,
    ) -> CoreResult<()> {
        let (tenant_id, physical) = self.resolver.physical_key(tenant, key)?;
        let value = serde_json::to_value(value)
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;
        let entry = self.write(partition, &tenant_id, &physical, Arc::new(value)).await?;
        if let Some(local) = local {
            local.insert((partition, physical), entry);
        }
        Ok(())
    }

    /// Encode, persist, fill the shared tier and run eviction.
    ///
    /// Encoding failures abort the write before anything is stored.
    async fn write(
        &self,
        partition: Partition,
        tenant_id: &str,
        physical: &str,
        value: Arc<Value>,
    ) -> CoreResult<MemoryEntry> {
        let encoded = self.codec.encode(value.as_ref())?;
        let now = self.clock.now();

        let entry = MemoryEntry {
            value,
            tenant_id: tenant_id.to_string(),
            created_at: now,
        };
        self.shared
            .insert((partition, physical.to_string()), entry.clone());

        let record = CacheRecord {
            partition,
            key: physical.to_string(),
            tenant_id: tenant_id.to_string(),
            created_at: now,
            last_access: now,
            size: encoded.size,
            compressed: encoded.compressed,
            payload: encoded.bytes,
        };
        match self.store.put(record).await {
            Ok(()) => self.evict(partition).await,
            Err(e) => log::warn!("[cache] Persistent write of {physical} failed, kept in memory: {e}"),
        }
        Ok(entry)
    }

    /// Delete the least recently accessed entries until `partition` is back
    /// within capacity.
    async fn evict(&self, partition: Partition) {
        let Some(capacity) = self.capacity(partition) else {
            return;
        };
        let _guard = self.eviction.lock().await;

        let count = match self.store.count(partition).await {
            Ok(count) => count,
            Err(e) => {
                log::warn!("[cache] Eviction skipped, count of {partition} failed: {e}");
                return;
            }
        };
        if count <= capacity {
            return;
        }

        let excess = count - capacity;
        let victims = match self.store.oldest_keys(partition, excess).await {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("[cache] Eviction scan of {partition} failed: {e}");
                return;
            }
        };
        if let Err(e) = self.store.delete_many(partition, &victims).await {
            log::warn!("[cache] Eviction of {} {partition} entries failed: {e}", victims.len());
            return;
        }
        self.shared.remove_many(partition, &victims);
        log::debug!("[cache] Evicted {} {partition} entries", victims.len());
    }

    async fn remove(
        &self,
        local: Option<&MemoryTier>,
        partition: Partition,
        tenant: Option<&str>,
        key: &str,
    ) -> CoreResult<()> {
        let (_, physical) = self.resolver.physical_key(tenant, key)?;
        let memory_key = (partition, physical);
        if let Some(local) = local {
            local.remove(&memory_key);
        }
        self.shared.remove(&memory_key);
        if let Err(e) = self.store.delete(partition, &memory_key.1).await {
            log::warn!("[cache] Persistent delete of {} failed: {e}", memory_key.1);
        }
        Ok(())
    }

    async fn invalidate_tenant(
        &self,
        local: Option<&MemoryTier>,
        partition: Partition,
        tenant: Option<&str>,
    ) -> u64 {
        let tenant_id = self.resolver.resolve(tenant);
        if let Some(local) = local {
            local.remove_tenant(partition, &tenant_id);
        }
        self.shared.remove_tenant(partition, &tenant_id);

        let keys = match self.store.keys_for_tenant(partition, &tenant_id).await {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("[cache] Failed to list {partition} entries of {tenant_id}: {e}");
                return 0;
            }
        };
        if let Err(e) = self.store.delete_many(partition, &keys).await {
            log::warn!("[cache] Failed to invalidate {partition} entries of {tenant_id}: {e}");
            return 0;
        }
        log::debug!("[cache] Invalidated {} {partition} entries of {tenant_id}", keys.len());
        keys.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{manual_clock, FailingCacheStore};
    use crate::traits::{InMemoryCacheStore, ManualClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Member {
        id: u32,
        name: String,
    }

    fn members() -> Vec<Member> {
        vec![
            Member {
                id: 1,
                name: "Ada".into(),
            },
            Member {
                id: 2,
                name: "Lin".into(),
            },
        ]
    }

    fn cache_with(store: &InMemoryCacheStore, clock: &ManualClock, config: CacheConfig) -> TieredCache {
        TieredCache::new(Arc::new(store.clone()), Arc::new(clock.clone()), config)
    }

    fn counted_fetch(
        calls: &Arc<AtomicUsize>,
        value: Vec<Member>,
    ) -> impl Future<Output = CoreResult<Vec<Member>>> + Send + 'static {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(value)
        }
    }

    #[test]
    fn ttl_boundary_is_inclusive() {
        let created = manual_clock().now();
        let ttl = Duration::from_secs(60);
        assert!(within_ttl(created, created + chrono::Duration::seconds(60), ttl));
        assert!(!within_ttl(created, created + chrono::Duration::seconds(61), ttl));
        assert!(within_ttl(created, created, Duration::MAX));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = InMemoryCacheStore::new();
        let cache = cache_with(&store, &manual_clock(), CacheConfig::default());

        cache
            .set(Partition::Reference, Some("7"), "members", &members())
            .await
            .unwrap();

        let hit: Option<Vec<Member>> = cache
            .get(Partition::Reference, Some("7"), "members", Some(Duration::MAX))
            .await;
        assert_eq!(hit, Some(members()));

        let record = store.get(Partition::Reference, "7:members").await.unwrap().unwrap();
        assert!(record.compressed);
        assert_eq!(record.tenant_id, "7");
    }

    #[tokio::test]
    async fn tenants_do_not_collide() {
        let store = InMemoryCacheStore::new();
        let cache = cache_with(&store, &manual_clock(), CacheConfig::default());

        cache.set(Partition::Reference, Some("1"), "labels", &vec!["a"]).await.unwrap();
        cache.set(Partition::Reference, Some("2"), "labels", &vec!["b"]).await.unwrap();

        let one: Option<Vec<String>> = cache.get(Partition::Reference, Some("1"), "labels", None).await;
        let two: Option<Vec<String>> = cache.get(Partition::Reference, Some("2"), "labels", None).await;
        let three: Option<Vec<String>> = cache.get(Partition::Reference, Some("3"), "labels", None).await;
        assert_eq!(one, Some(vec!["a".to_string()]));
        assert_eq!(two, Some(vec!["b".to_string()]));
        assert_eq!(three, None);
    }

    #[tokio::test]
    async fn separator_in_tenant_id_stays_isolated() {
        let store = InMemoryCacheStore::new();
        let clock = manual_clock();
        let cache = cache_with(&store, &clock, CacheConfig::default());

        cache
            .set(Partition::Reference, Some("a:b"), "c", &"tenant-ab-secret")
            .await
            .unwrap();

        let other: Option<String> = cache.get(Partition::Reference, Some("a"), "b:c", None).await;
        assert_eq!(other, None);

        // Through the persistent tier as well
        let reloaded = cache_with(&store, &clock, CacheConfig::default());
        let other: Option<String> = reloaded.get(Partition::Reference, Some("a"), "b:c", None).await;
        assert_eq!(other, None);
        let owner: Option<String> = reloaded.get(Partition::Reference, Some("a:b"), "c", None).await;
        assert_eq!(owner.as_deref(), Some("tenant-ab-secret"));

        assert_eq!(cache.invalidate_tenant(Partition::Reference, Some("a")).await, 0);
        assert_eq!(cache.invalidate_tenant(Partition::Reference, Some("a:b")).await, 1);
    }

    #[tokio::test]
    async fn stale_entries_miss_but_stay_on_disk() {
        let store = InMemoryCacheStore::new();
        let clock = manual_clock();
        let cache = cache_with(&store, &clock, CacheConfig::default());
        let ttl = Some(Duration::from_secs(60));

        cache.set(Partition::Reference, Some("7"), "envs", &vec!["staging"]).await.unwrap();
        clock.advance(Duration::from_secs(61));

        let miss: Option<Vec<String>> = cache.get(Partition::Reference, Some("7"), "envs", ttl).await;
        assert_eq!(miss, None);
        assert_eq!(cache.entry_count(Partition::Reference).await, 1);

        // A new page reading through the persistent tier sees the same staleness
        let reloaded = cache_with(&store, &clock, CacheConfig::default());
        let miss: Option<Vec<String>> = reloaded.get(Partition::Reference, Some("7"), "envs", ttl).await;
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn persistent_hit_fills_memory_and_bumps_access() {
        let store = InMemoryCacheStore::new();
        let clock = manual_clock();
        cache_with(&store, &clock, CacheConfig::default())
            .set(Partition::Execution, Some("7"), "run-12", &members())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(30));
        let reloaded = cache_with(&store, &clock, CacheConfig::default());
        let hit: Option<Vec<Member>> = reloaded.get(Partition::Execution, Some("7"), "run-12", None).await;
        assert_eq!(hit, Some(members()));

        let record = store.get(Partition::Execution, "7:run-12").await.unwrap().unwrap();
        assert_eq!(record.last_access, clock.now());

        // Served from the page-wide tier once the store is gone
        store.clear(Partition::Execution).await.unwrap();
        let hit: Option<Vec<Member>> = reloaded.get(Partition::Execution, Some("7"), "run-12", None).await;
        assert_eq!(hit, Some(members()));
    }

    #[tokio::test]
    async fn eviction_drops_least_recently_accessed() {
        let store = InMemoryCacheStore::new();
        let clock = manual_clock();
        let config = CacheConfig {
            execution_capacity: 3,
            ..CacheConfig::default()
        };
        let cache = cache_with(&store, &clock, config.clone());

        for key in ["k1", "k2", "k3"] {
            cache.set(Partition::Execution, Some("7"), key, &key).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }

        // Read k1 through the persistent tier so its last access moves forward
        let reader = cache_with(&store, &clock, config);
        let _: Option<String> = reader.get(Partition::Execution, Some("7"), "k1", None).await;
        clock.advance(Duration::from_secs(1));

        cache.set(Partition::Execution, Some("7"), "k4", &"k4").await.unwrap();

        assert_eq!(cache.entry_count(Partition::Execution).await, 3);
        assert!(store.get(Partition::Execution, "7:k2").await.unwrap().is_none());
        for kept in ["7:k1", "7:k3", "7:k4"] {
            assert!(store.get(Partition::Execution, kept).await.unwrap().is_some());
        }
        let evicted: Option<String> = cache.get(Partition::Execution, Some("7"), "k2", None).await;
        assert_eq!(evicted, None);
    }

    #[tokio::test]
    async fn eviction_removes_minimum_needed() {
        let store = InMemoryCacheStore::new();
        let clock = manual_clock();
        let cache = cache_with(
            &store,
            &clock,
            CacheConfig {
                execution_capacity: 2,
                ..CacheConfig::default()
            },
        );

        for i in 0..5 {
            cache.set(Partition::Execution, Some("7"), &format!("k{i}"), &i).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }

        let mut remaining = store.oldest_keys(Partition::Execution, 10).await.unwrap();
        remaining.sort();
        assert_eq!(remaining, vec!["7:k3".to_string(), "7:k4".to_string()]);
    }

    #[tokio::test]
    async fn reference_partition_unbounded_by_default() {
        let store = InMemoryCacheStore::new();
        let cache = cache_with(
            &store,
            &manual_clock(),
            CacheConfig {
                execution_capacity: 1,
                ..CacheConfig::default()
            },
        );
        for i in 0..10 {
            cache.set(Partition::Reference, Some("7"), &format!("k{i}"), &i).await.unwrap();
        }
        assert_eq!(cache.entry_count(Partition::Reference).await, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let cache = cache_with(&InMemoryCacheStore::new(), &manual_clock(), CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b, c) = tokio::join!(
            cache.get_or_fetch(Partition::Reference, Some("7"), "members", None, || {
                counted_fetch(&calls, members())
            }),
            cache.get_or_fetch(Partition::Reference, Some("7"), "members", None, || {
                counted_fetch(&calls, members())
            }),
            cache.get::<Vec<Member>>(Partition::Reference, Some("7"), "members", None),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), members());
        assert_eq!(b.unwrap(), members());
        assert_eq!(c, Some(members()));

        // Later calls hit the cache
        let again = cache
            .get_or_fetch(Partition::Reference, Some("7"), "members", None, || {
                counted_fetch(&calls, members())
            })
            .await
            .unwrap();
        assert_eq!(again, members());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_fetch_independently() {
        let cache = cache_with(&InMemoryCacheStore::new(), &manual_clock(), CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.get_or_fetch(Partition::Reference, Some("1"), "members", None, || {
                counted_fetch(&calls, members())
            }),
            cache.get_or_fetch(Partition::Reference, Some("2"), "members", None, || {
                counted_fetch(&calls, Vec::new())
            }),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.unwrap(), members());
        assert!(b.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_errors_propagate_and_are_not_cached() {
        let store = InMemoryCacheStore::new();
        let cache = cache_with(&store, &manual_clock(), CacheConfig::default());

        let err = cache
            .get_or_fetch::<Vec<Member>, _, _>(Partition::Reference, Some("7"), "members", None, || async {
                Err(CoreError::FetchError("HTTP 500".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::FetchError(_)));
        assert_eq!(cache.entry_count(Partition::Reference).await, 0);

        let value = cache
            .get_or_fetch(Partition::Reference, Some("7"), "members", None, || async {
                Ok(members())
            })
            .await
            .unwrap();
        assert_eq!(value, members());
    }

    #[tokio::test]
    async fn unavailable_store_degrades_to_memory() {
        let clock = manual_clock();
        let cache = TieredCache::new(
            Arc::new(FailingCacheStore),
            Arc::new(clock.clone()),
            CacheConfig::default(),
        );

        cache.set(Partition::Reference, Some("7"), "types", &vec!["manual"]).await.unwrap();
        let hit: Option<Vec<String>> = cache.get(Partition::Reference, Some("7"), "types", None).await;
        assert_eq!(hit, Some(vec!["manual".to_string()]));

        let miss: Option<Vec<String>> = cache.get(Partition::Reference, Some("7"), "other", None).await;
        assert_eq!(miss, None);
        assert_eq!(cache.entry_count(Partition::Reference).await, 0);
        assert_eq!(cache.invalidate_tenant(Partition::Reference, Some("7")).await, 0);
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("cyclic value"))
        }
    }

    #[tokio::test]
    async fn failed_encode_writes_nothing() {
        let store = InMemoryCacheStore::new();
        let cache = cache_with(&store, &manual_clock(), CacheConfig::default());

        let err = cache
            .set(Partition::Reference, Some("7"), "broken", &Unserializable)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SerializationError(_)));
        assert_eq!(cache.entry_count(Partition::Reference).await, 0);
        let miss: Option<Value> = cache.get(Partition::Reference, Some("7"), "broken", None).await;
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn empty_key_rejected() {
        let cache = cache_with(&InMemoryCacheStore::new(), &manual_clock(), CacheConfig::default());
        assert!(matches!(
            cache.set(Partition::Reference, Some("7"), "", &1).await,
            Err(CoreError::ValidationError(_))
        ));
        let miss: Option<u32> = cache.get(Partition::Reference, Some("7"), "", None).await;
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn fallback_tenant_is_stable_within_a_page() {
        let store = InMemoryCacheStore::new();
        let cache = cache_with(&store, &manual_clock(), CacheConfig::default());

        cache.set(Partition::Reference, None, "prefs", &"dark").await.unwrap();
        let hit: Option<String> = cache.get(Partition::Reference, Some("undefined"), "prefs", None).await;
        assert_eq!(hit.as_deref(), Some("dark"));

        let fallback = cache.tenants().fallback_tenant().to_string();
        assert!(fallback.starts_with("anon-"));
        assert!(store
            .get(Partition::Reference, &format!("{fallback}:prefs"))
            .await
            .unwrap()
            .is_some());

        // Another page gets its own fallback
        let other_page = cache_with(&store, &manual_clock(), CacheConfig::default());
        let miss: Option<String> = other_page.get(Partition::Reference, None, "prefs", None).await;
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn current_tenant_used_when_none_given() {
        let cache = cache_with(&InMemoryCacheStore::new(), &manual_clock(), CacheConfig::default());
        cache.tenants().set_current_tenant(Some("42"));

        cache.set(Partition::Reference, None, "labels", &vec!["p1"]).await.unwrap();
        let hit: Option<Vec<String>> = cache.get(Partition::Reference, Some("42"), "labels", None).await;
        assert_eq!(hit, Some(vec!["p1".to_string()]));
    }

    #[tokio::test]
    async fn remove_clears_every_tier() {
        let store = InMemoryCacheStore::new();
        let cache = cache_with(&store, &manual_clock(), CacheConfig::default());
        let scope = cache.scope();

        scope.set(Partition::Reference, Some("7"), "members", &members()).await.unwrap();
        scope.remove(Partition::Reference, Some("7"), "members").await.unwrap();

        let miss: Option<Vec<Member>> = scope.get(Partition::Reference, Some("7"), "members", None).await;
        assert_eq!(miss, None);
        assert_eq!(cache.entry_count(Partition::Reference).await, 0);
    }

    #[tokio::test]
    async fn invalidate_tenant_spares_others() {
        let store = InMemoryCacheStore::new();
        let cache = cache_with(&store, &manual_clock(), CacheConfig::default());
        cache.set(Partition::Reference, Some("1"), "members", &1).await.unwrap();
        cache.set(Partition::Reference, Some("1"), "labels", &2).await.unwrap();
        cache.set(Partition::Reference, Some("2"), "members", &3).await.unwrap();

        assert_eq!(cache.invalidate_tenant(Partition::Reference, Some("1")).await, 2);

        let gone: Option<u32> = cache.get(Partition::Reference, Some("1"), "members", None).await;
        let kept: Option<u32> = cache.get(Partition::Reference, Some("2"), "members", None).await;
        assert_eq!(gone, None);
        assert_eq!(kept, Some(3));
    }

    #[tokio::test]
    async fn scope_local_tier_survives_shared_eviction() {
        let store = InMemoryCacheStore::new();
        let clock = manual_clock();
        let cache = cache_with(&store, &clock, CacheConfig::default());
        let scope = cache.scope();

        cache.set(Partition::Reference, Some("7"), "members", &members()).await.unwrap();
        let hit: Option<Vec<Member>> = scope.get(Partition::Reference, Some("7"), "members", None).await;
        assert_eq!(hit, Some(members()));

        // Gone from the page-wide and persistent tiers, still in the widget
        cache.remove(Partition::Reference, Some("7"), "members").await.unwrap();
        let local: Option<Vec<Member>> = scope.get(Partition::Reference, Some("7"), "members", None).await;
        assert_eq!(local, Some(members()));

        // Local entries age out like the rest
        clock.advance(Duration::from_secs(3601));
        let stale: Option<Vec<Member>> = scope.get(Partition::Reference, Some("7"), "members", None).await;
        assert_eq!(stale, None);
    }

    #[tokio::test]
    async fn shape_mismatch_is_a_miss() {
        let cache = cache_with(&InMemoryCacheStore::new(), &manual_clock(), CacheConfig::default());
        cache.set(Partition::Reference, Some("7"), "count", &"seven").await.unwrap();
        let miss: Option<u32> = cache.get(Partition::Reference, Some("7"), "count", None).await;
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn stats_count_both_partitions() {
        let cache = cache_with(&InMemoryCacheStore::new(), &manual_clock(), CacheConfig::default());
        cache.set(Partition::Reference, Some("7"), "a", &1).await.unwrap();
        cache.set(Partition::Execution, Some("7"), "b", &2).await.unwrap();
        cache.set(Partition::Execution, Some("7"), "c", &3).await.unwrap();

        assert_eq!(
            cache.stats().await,
            CacheStats {
                reference_entries: 1,
                execution_entries: 2,
            }
        );
    }
}

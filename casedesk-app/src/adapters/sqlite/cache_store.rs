//! `CacheStore` implementation for `SqliteStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveValue::Set,
    ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};

use casedesk_core::error::{CoreError, CoreResult};
use casedesk_core::traits::CacheStore;
use casedesk_core::types::{CacheRecord, Partition};

use super::entity::cache_entry;
use super::SqliteStore;

/// Keys per `DELETE ... IN (...)` statement, below `SQLite`'s bound
/// parameter limit.
const DELETE_CHUNK: usize = 500;

fn from_millis(value: i64, column: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| CoreError::SerializationError(format!("Invalid {column}: {value}")))
}

impl cache_entry::Model {
    /// Convert a `SeaORM` row model into a `CacheRecord`.
    fn into_record(self) -> CoreResult<CacheRecord> {
        let partition = Partition::parse(&self.partition).ok_or_else(|| {
            CoreError::SerializationError(format!("Unknown partition: {}", self.partition))
        })?;
        Ok(CacheRecord {
            partition,
            key: self.cache_key,
            tenant_id: self.tenant_id,
            created_at: from_millis(self.created_at, "created_at")?,
            last_access: from_millis(self.last_access, "last_access")?,
            size: u64::try_from(self.size).unwrap_or_default(),
            compressed: self.compressed,
            payload: self.payload,
        })
    }
}

/// Convert a `CacheRecord` into a `SeaORM` active model for upsert.
fn record_to_active_model(record: CacheRecord) -> cache_entry::ActiveModel {
    cache_entry::ActiveModel {
        partition: Set(record.partition.as_str().to_string()),
        cache_key: Set(record.key),
        tenant_id: Set(record.tenant_id),
        created_at: Set(record.created_at.timestamp_millis()),
        last_access: Set(record.last_access.timestamp_millis()),
        size: Set(i64::try_from(record.size).unwrap_or(i64::MAX)),
        compressed: Set(record.compressed),
        payload: Set(record.payload),
    }
}

fn storage_error(action: &str) -> impl FnOnce(sea_orm::DbErr) -> CoreError + '_ {
    move |e| CoreError::StorageError(format!("Failed to {action}: {e}"))
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn put(&self, record: CacheRecord) -> CoreResult<()> {
        cache_entry::Entity::insert(record_to_active_model(record))
            .on_conflict(
                OnConflict::columns([cache_entry::Column::Partition, cache_entry::Column::CacheKey])
                    .update_columns([
                        cache_entry::Column::TenantId,
                        cache_entry::Column::CreatedAt,
                        cache_entry::Column::LastAccess,
                        cache_entry::Column::Size,
                        cache_entry::Column::Compressed,
                        cache_entry::Column::Payload,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(storage_error("write cache entry"))?;
        Ok(())
    }

    async fn get(&self, partition: Partition, key: &str) -> CoreResult<Option<CacheRecord>> {
        let row = cache_entry::Entity::find_by_id((partition.as_str().to_string(), key.to_string()))
            .one(&self.db)
            .await
            .map_err(storage_error("query cache entry"))?;

        row.map(cache_entry::Model::into_record).transpose()
    }

    async fn touch(&self, partition: Partition, key: &str, at: DateTime<Utc>) -> CoreResult<()> {
        cache_entry::Entity::update_many()
            .col_expr(
                cache_entry::Column::LastAccess,
                Expr::value(at.timestamp_millis()),
            )
            .filter(cache_entry::Column::Partition.eq(partition.as_str()))
            .filter(cache_entry::Column::CacheKey.eq(key))
            .exec(&self.db)
            .await
            .map_err(storage_error("update last access"))?;
        Ok(())
    }

    async fn delete(&self, partition: Partition, key: &str) -> CoreResult<()> {
        cache_entry::Entity::delete_many()
            .filter(cache_entry::Column::Partition.eq(partition.as_str()))
            .filter(cache_entry::Column::CacheKey.eq(key))
            .exec(&self.db)
            .await
            .map_err(storage_error("delete cache entry"))?;
        Ok(())
    }

    async fn delete_many(&self, partition: Partition, keys: &[String]) -> CoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let txn = self
            .db
            .begin()
            .await
            .map_err(storage_error("begin transaction"))?;
        for chunk in keys.chunks(DELETE_CHUNK) {
            cache_entry::Entity::delete_many()
                .filter(cache_entry::Column::Partition.eq(partition.as_str()))
                .filter(cache_entry::Column::CacheKey.is_in(chunk.iter().cloned()))
                .exec(&txn)
                .await
                .map_err(storage_error("delete cache entries"))?;
        }
        txn.commit()
            .await
            .map_err(storage_error("commit cache deletion"))?;
        Ok(())
    }

    async fn count(&self, partition: Partition) -> CoreResult<u64> {
        cache_entry::Entity::find()
            .filter(cache_entry::Column::Partition.eq(partition.as_str()))
            .count(&self.db)
            .await
            .map_err(storage_error("count cache entries"))
    }

    async fn oldest_keys(&self, partition: Partition, limit: u64) -> CoreResult<Vec<String>> {
        cache_entry::Entity::find()
            .select_only()
            .column(cache_entry::Column::CacheKey)
            .filter(cache_entry::Column::Partition.eq(partition.as_str()))
            .order_by_asc(cache_entry::Column::LastAccess)
            .order_by_asc(cache_entry::Column::CreatedAt)
            .order_by_asc(cache_entry::Column::CacheKey)
            .limit(limit)
            .into_tuple::<String>()
            .all(&self.db)
            .await
            .map_err(storage_error("scan cache entries"))
    }

    async fn keys_for_tenant(
        &self,
        partition: Partition,
        tenant_id: &str,
    ) -> CoreResult<Vec<String>> {
        cache_entry::Entity::find()
            .select_only()
            .column(cache_entry::Column::CacheKey)
            .filter(cache_entry::Column::Partition.eq(partition.as_str()))
            .filter(cache_entry::Column::TenantId.eq(tenant_id))
            .into_tuple::<String>()
            .all(&self.db)
            .await
            .map_err(storage_error("query tenant entries"))
    }

    async fn clear(&self, partition: Partition) -> CoreResult<()> {
        let result = cache_entry::Entity::delete_many()
            .filter(cache_entry::Column::Partition.eq(partition.as_str()))
            .exec(&self.db)
            .await
            .map_err(storage_error("clear cache partition"))?;
        log::info!(
            "Cleared {} {partition} cache entries from SQLite",
            result.rows_affected
        );
        Ok(())
    }
}

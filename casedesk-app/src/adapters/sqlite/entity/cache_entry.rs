//! `SeaORM` entity for the `cache_entry` table.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cache_entry")]
/// Database row model for one persisted cache record.
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub partition: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub cache_key: String,
    pub tenant_id: String,
    /// Unix milliseconds
    pub created_at: i64,
    /// Unix milliseconds, drives LRU ordering
    pub last_access: i64,
    pub size: i64,
    pub compressed: bool,
    pub payload: Vec<u8>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

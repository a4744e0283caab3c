//! `SeaORM` entity for the single-row `credential` table.

use sea_orm::entity::prelude::*;

/// Primary key of the only row.
pub const SESSION_ROW: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "credential")]
/// Database row model for the persisted session credential.
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    pub token: String,
    /// RFC3339
    pub expires_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

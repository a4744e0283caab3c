//! `SeaORM` entities for `SqliteStore`.

pub mod cache_entry;
pub mod credential;

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // credential
        manager
            .create_table(
                Table::create()
                    .table(Credential::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Credential::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Credential::Token).string().not_null())
                    .col(ColumnDef::new(Credential::ExpiresAt).string().not_null())
                    .to_owned(),
            )
            .await?;

        // cache_entry
        manager
            .create_table(
                Table::create()
                    .table(CacheEntry::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CacheEntry::Partition).string().not_null())
                    .col(ColumnDef::new(CacheEntry::CacheKey).string().not_null())
                    .col(ColumnDef::new(CacheEntry::TenantId).string().not_null())
                    .col(ColumnDef::new(CacheEntry::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(CacheEntry::LastAccess).big_integer().not_null())
                    .col(ColumnDef::new(CacheEntry::Size).big_integer().not_null())
                    .col(
                        ColumnDef::new(CacheEntry::Compressed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(CacheEntry::Payload).blob().not_null())
                    .primary_key(
                        Index::create()
                            .col(CacheEntry::Partition)
                            .col(CacheEntry::CacheKey),
                    )
                    .to_owned(),
            )
            .await?;

        // LRU scan
        manager
            .create_index(
                Index::create()
                    .name("idx_cache_entry_last_access")
                    .table(CacheEntry::Table)
                    .col(CacheEntry::Partition)
                    .col(CacheEntry::LastAccess)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Tenant-scoped queries
        manager
            .create_index(
                Index::create()
                    .name("idx_cache_entry_tenant")
                    .table(CacheEntry::Table)
                    .col(CacheEntry::Partition)
                    .col(CacheEntry::TenantId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CacheEntry::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Credential::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Credential {
    Table,
    Id,
    Token,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum CacheEntry {
    Table,
    Partition,
    CacheKey,
    TenantId,
    CreatedAt,
    LastAccess,
    Size,
    Compressed,
    Payload,
}

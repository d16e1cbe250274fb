use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PortAllocation::Table)
                    .if_not_exists()
                    .col(string_len(PortAllocation::Key, 255).primary_key())
                    .col(text(PortAllocation::Value).not_null())
                    .col(big_integer(PortAllocation::ExpiresAtMs).not_null())
                    .col(
                        timestamp_with_time_zone(PortAllocation::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Purge sweeps delete by expiry
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_port_allocations_expires_at_ms")
                    .table(PortAllocation::Table)
                    .col(PortAllocation::ExpiresAtMs)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PortAllocation::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PortAllocation {
    #[sea_orm(iden = "port_allocations")]
    Table,
    Key,
    Value,
    ExpiresAtMs,
    CreatedAt,
}

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ClientSession::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ClientSession::Id)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ClientSession::Data).binary().not_null())
                    .col(
                        ColumnDef::new(ClientSession::ExpiryDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_client_session_expiry_date")
                    .table(ClientSession::Table)
                    .col(ClientSession::ExpiryDate)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ClientSession::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ClientSession {
    Table,
    Id,
    Data,
    ExpiryDate,
}

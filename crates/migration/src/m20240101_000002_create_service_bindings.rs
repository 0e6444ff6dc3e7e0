//! Create `service_bindings` table holding raw bind details per binding id.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ServiceBindings::Table)
                    .if_not_exists()
                    .col(string_len(ServiceBindings::Id, 255).primary_key())
                    .col(text(ServiceBindings::Value).not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(ServiceBindings::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum ServiceBindings { Table, Id, Value }

//! Create `service_instances` table.
//!
//! One row per provisioned instance; the serialized instance lives in `value`.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ServiceInstances::Table)
                    .if_not_exists()
                    .col(string_len(ServiceInstances::Id, 255).primary_key())
                    .col(string_len(ServiceInstances::OrganizationGuid, 255).not_null())
                    .col(string_len(ServiceInstances::SpaceGuid, 255).not_null())
                    .col(string_len(ServiceInstances::StorageAccountName, 255).not_null())
                    .col(text(ServiceInstances::Value).not_null())
                    .to_owned(),
            )
            .await?;

        // One instance per storage account within an org/space
        manager
            .create_index(
                Index::create()
                    .name("idx_service_instances_storage_account")
                    .table(ServiceInstances::Table)
                    .col(ServiceInstances::OrganizationGuid)
                    .col(ServiceInstances::SpaceGuid)
                    .col(ServiceInstances::StorageAccountName)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(ServiceInstances::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum ServiceInstances { Table, Id, OrganizationGuid, SpaceGuid, StorageAccountName, Value }

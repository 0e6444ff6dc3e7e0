//! Create `file_shares` table with FK to `service_instances`.
//!
//! Row id is `{instance_id}-{file_share_name}`; the pair is also unique on its own.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FileShares::Table)
                    .if_not_exists()
                    .col(string_len(FileShares::Id, 255).primary_key())
                    .col(string_len(FileShares::InstanceId, 255).not_null())
                    .col(string_len(FileShares::FileShareName, 255).not_null())
                    .col(text(FileShares::Value).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_file_shares_instance")
                            .from(FileShares::Table, FileShares::InstanceId)
                            .to(ServiceInstances::Table, ServiceInstances::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_file_shares_instance_share")
                    .table(FileShares::Table)
                    .col(FileShares::InstanceId)
                    .col(FileShares::FileShareName)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(FileShares::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum FileShares { Table, Id, InstanceId, FileShareName, Value }

#[derive(DeriveIden)]
enum ServiceInstances { Table, Id }

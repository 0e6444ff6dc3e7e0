//! Migrator registering broker tables in dependency order.
//! File shares reference service instances, so they come last.
pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_service_instances;
mod m20240101_000002_create_service_bindings;
mod m20240101_000003_create_file_shares;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_service_instances::Migration),
            Box::new(m20240101_000002_create_service_bindings::Migration),
            Box::new(m20240101_000003_create_file_shares::Migration),
        ]
    }
}

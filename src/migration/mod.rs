//! SeaORM database migrations.

pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_reference_tables;
mod m20261001_000002_create_cases;
mod m20261001_000003_create_migrations;
mod m20261001_000004_create_migration_reports;
mod m20261001_000005_create_deployment_reports;
mod m20261001_000006_create_case_edits;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_reference_tables::Migration),
            Box::new(m20261001_000002_create_cases::Migration),
            Box::new(m20261001_000003_create_migrations::Migration),
            Box::new(m20261001_000004_create_migration_reports::Migration),
            Box::new(m20261001_000005_create_deployment_reports::Migration),
            Box::new(m20261001_000006_create_case_edits::Migration),
        ]
    }
}

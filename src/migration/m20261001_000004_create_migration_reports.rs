//! Migration: Create migration_reports and migration_step_reports tables.
//!
//! Step reports reference their step by id without a foreign key so a report
//! survives the removal of the step it describes.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TABLE migration_reports (
                    id UUID PRIMARY KEY,
                    migration_id UUID NOT NULL REFERENCES migrations(id) ON DELETE CASCADE,
                    instance_id UUID NOT NULL REFERENCES instances(id) ON DELETE CASCADE,
                    status VARCHAR(20) NOT NULL DEFAULT 'error'
                        CHECK (status IN ('applied', 'applied_partially', 'error')),
                    log TEXT NOT NULL DEFAULT '',
                    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE (migration_id, instance_id)
                );

                CREATE INDEX idx_migration_reports_instance_id ON migration_reports(instance_id);

                CREATE TABLE migration_step_reports (
                    id UUID PRIMARY KEY,
                    report_id UUID NOT NULL REFERENCES migration_reports(id) ON DELETE CASCADE,
                    step_id UUID NOT NULL,
                    status VARCHAR(20) NOT NULL
                        CHECK (status IN ('applied', 'error')),
                    log TEXT NOT NULL DEFAULT '',
                    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE (report_id, step_id)
                );

                CREATE TRIGGER update_migration_reports_updated_at
                    BEFORE UPDATE ON migration_reports
                    FOR EACH ROW
                    EXECUTE FUNCTION update_updated_at_column();
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DROP TABLE IF EXISTS migration_step_reports CASCADE;
                DROP TABLE IF EXISTS migration_reports CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}

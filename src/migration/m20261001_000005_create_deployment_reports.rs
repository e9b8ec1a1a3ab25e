//! Migration: Create deployment_reports and deployment_report_cases tables.

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
                CREATE TABLE deployment_reports (
                    id UUID PRIMARY KEY, -- UUIDv7 for time-ordered sorting
                    instance_id UUID NOT NULL REFERENCES instances(id) ON DELETE CASCADE,
                    release_id UUID REFERENCES releases(id) ON DELETE SET NULL,
                    status VARCHAR(20) NOT NULL
                        CHECK (status IN ('deployed', 'error')),
                    log TEXT NOT NULL DEFAULT '',
                    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE INDEX idx_deployment_reports_instance_id ON deployment_reports(instance_id);

                CREATE TABLE deployment_report_cases (
                    deployment_report_id UUID NOT NULL REFERENCES deployment_reports(id) ON DELETE CASCADE,
                    case_id BIGINT NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
                    PRIMARY KEY (deployment_report_id, case_id)
                );

                -- Reverse lookup for the notify sweep
                CREATE INDEX idx_deployment_report_cases_case_id ON deployment_report_cases(case_id);
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
                DROP TABLE IF EXISTS deployment_report_cases CASCADE;
                DROP TABLE IF EXISTS deployment_reports CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}

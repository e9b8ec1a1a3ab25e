//! Migration: Create cases table.
//!
//! Cases mirror tracker records; the tracker id is the primary key.

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
                CREATE TABLE cases (
                    id BIGINT PRIMARY KEY,
                    title TEXT NOT NULL DEFAULT '',
                    description TEXT NOT NULL DEFAULT '',
                    tracker_project VARCHAR(255),
                    area VARCHAR(255),
                    project_id UUID REFERENCES projects(id) ON DELETE SET NULL,
                    release_id UUID NOT NULL REFERENCES releases(id),
                    modified_at TIMESTAMPTZ,
                    tags JSONB NOT NULL DEFAULT '[]'::jsonb,
                    revision VARCHAR(255),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE INDEX idx_cases_release_id ON cases(release_id);
                CREATE INDEX idx_cases_project_id ON cases(project_id);

                CREATE TRIGGER update_cases_updated_at
                    BEFORE UPDATE ON cases
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
                DROP TRIGGER IF EXISTS update_cases_updated_at ON cases;
                DROP TABLE IF EXISTS cases CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}

//! Migration: Create case_edits table (the tracker sync outbox).
//!
//! One pending row per (case, edit type, target digest). The digest is empty
//! for single-instance intents, so the unique constraint covers both shapes.

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
                CREATE TABLE case_edits (
                    id UUID PRIMARY KEY, -- UUIDv7, FIFO order
                    case_id BIGINT NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
                    edit_type VARCHAR(40) NOT NULL
                        CHECK (edit_type IN (
                            'link-migration',
                            'mark-reviewed',
                            'mark-unreviewed',
                            'migration-report-changed',
                            'deployment-report-changed'
                        )),
                    target_digest VARCHAR(64) NOT NULL DEFAULT '',
                    params JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE (case_id, edit_type, target_digest)
                );

                CREATE INDEX idx_case_edits_case_id_created ON case_edits(case_id, created_at, id);
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS case_edits CASCADE;")
            .await?;

        Ok(())
    }
}

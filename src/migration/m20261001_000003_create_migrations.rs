//! Migration: Create migrations and migration_steps tables.

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
                CREATE TABLE migrations (
                    id UUID PRIMARY KEY,
                    uid VARCHAR(255) NOT NULL UNIQUE,
                    -- Resolved against migrations of the same project when sorting
                    parent_uid VARCHAR(255),
                    case_id BIGINT NOT NULL UNIQUE REFERENCES cases(id) ON DELETE CASCADE,
                    category VARCHAR(20) NOT NULL DEFAULT 'online'
                        CHECK (category IN ('online', 'offline')),
                    reviewed BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    CHECK (parent_uid IS NULL OR parent_uid <> uid)
                );

                CREATE INDEX idx_migrations_parent_uid ON migrations(parent_uid);

                CREATE TABLE migration_steps (
                    id UUID PRIMARY KEY,
                    migration_id UUID NOT NULL REFERENCES migrations(id) ON DELETE CASCADE,
                    phase VARCHAR(20) NOT NULL
                        CHECK (phase IN ('pre_deploy', 'post_deploy', 'final')),
                    step_type VARCHAR(20) NOT NULL
                        CHECK (step_type IN ('mysql', 'pgsql', 'python', 'sh')),
                    code TEXT NOT NULL,
                    path VARCHAR(1024),
                    position INTEGER NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE (migration_id, phase, position)
                );

                CREATE TRIGGER update_migrations_updated_at
                    BEFORE UPDATE ON migrations
                    FOR EACH ROW
                    EXECUTE FUNCTION update_updated_at_column();

                CREATE TRIGGER update_migration_steps_updated_at
                    BEFORE UPDATE ON migration_steps
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
                DROP TABLE IF EXISTS migration_steps CASCADE;
                DROP TABLE IF EXISTS migrations CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}

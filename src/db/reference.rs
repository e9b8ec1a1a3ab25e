//! Database queries for releases, instances and projects.

use chrono::NaiveDate;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseBackend, EntityTrait, FromQueryResult, QueryFilter,
    QueryOrder, Statement,
};
use uuid::Uuid;

use crate::entity::project::{self, Entity as Project};
use crate::entity::release::{self, Entity as Release};
use crate::error::{AppError, AppResult};

use super::DbPool;

#[derive(Debug, FromQueryResult)]
struct IdRow {
    id: Uuid,
}

async fn upsert_returning_id<C: ConnectionTrait>(
    conn: &C,
    sql: &str,
    values: Vec<sea_orm::Value>,
    what: &str,
) -> AppResult<Uuid> {
    let row = IdRow::find_by_statement(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        sql,
        values,
    ))
    .one(conn)
    .await
    .map_err(|e| AppError::Database(format!("Failed to upsert {}: {}", what, e)))?
    .ok_or_else(|| AppError::Database(format!("Upsert of {} returned no row", what)))?;

    Ok(row.id)
}

/// Get or create a release by milestone name. A known date is never cleared.
pub async fn ensure_release<C: ConnectionTrait>(
    conn: &C,
    name: &str,
    date: Option<NaiveDate>,
) -> AppResult<Uuid> {
    upsert_returning_id(
        conn,
        r#"
        INSERT INTO releases (id, name, date)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE SET date = COALESCE(EXCLUDED.date, releases.date)
        RETURNING id
        "#,
        vec![Uuid::now_v7().into(), name.into(), date.into()],
        "release",
    )
    .await
}

/// Get or create an instance by name.
pub async fn ensure_instance<C: ConnectionTrait>(conn: &C, name: &str) -> AppResult<Uuid> {
    upsert_returning_id(
        conn,
        r#"
        INSERT INTO instances (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
        vec![Uuid::now_v7().into(), name.into()],
        "instance",
    )
    .await
}

/// Get or create a CI project by name.
pub async fn ensure_project<C: ConnectionTrait>(conn: &C, name: &str) -> AppResult<Uuid> {
    upsert_returning_id(
        conn,
        r#"
        INSERT INTO projects (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
        vec![Uuid::now_v7().into(), name.into()],
        "project",
    )
    .await
}

impl DbPool {
    /// Get a project by name.
    pub async fn get_project_by_name(&self, name: &str) -> AppResult<Option<project::Model>> {
        let result = Project::find()
            .filter(project::Column::Name.eq(name))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get project: {}", e)))?;

        Ok(result)
    }

    /// All known releases, newest first.
    pub async fn list_releases(&self) -> AppResult<Vec<release::Model>> {
        let result = Release::find()
            .order_by_desc(release::Column::Date)
            .order_by_asc(release::Column::Name)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list releases: {}", e)))?;

        Ok(result)
    }
}

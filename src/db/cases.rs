//! Database queries for cases.

use std::collections::HashMap;

use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseBackend, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Statement, TransactionTrait,
};

use crate::entity::case::{self, Entity as Case};
use crate::error::{AppError, AppResult};
use crate::models::{CaseView, ImportedCase};

use super::{DbPool, reference};

fn tags_json(tags: &[String]) -> serde_json::Value {
    serde_json::Value::from(tags.to_vec())
}

/// Replace the stored tag set of a case.
pub async fn update_case_tags<C: ConnectionTrait>(
    conn: &C,
    case_id: i64,
    tags: &[String],
) -> AppResult<()> {
    conn.execute_raw(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        "UPDATE cases SET tags = $1 WHERE id = $2",
        vec![tags_json(tags).into(), case_id.into()],
    ))
    .await
    .map_err(|e| AppError::Database(format!("Failed to update case tags: {}", e)))?;

    Ok(())
}

impl From<case::Model> for CaseView {
    fn from(model: case::Model) -> Self {
        let tags = model.tag_list();
        CaseView {
            id: model.id,
            title: model.title,
            description: model.description,
            tracker_project: model.tracker_project,
            area: model.area,
            project_id: model.project_id,
            release_id: model.release_id,
            modified_at: model.modified_at,
            tags,
            revision: model.revision,
        }
    }
}

impl DbPool {
    /// Insert or refresh a case from tracker data, creating its release and project.
    pub async fn upsert_case(&self, imported: &ImportedCase) -> AppResult<case::Model> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let release_id =
            reference::ensure_release(&txn, &imported.release, imported.release_date).await?;
        let project_id = match imported.ci_project.as_deref() {
            Some(name) => Some(reference::ensure_project(&txn, name).await?),
            None => None,
        };

        txn.execute_raw(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            INSERT INTO cases (
                id, title, description, tracker_project, area,
                project_id, release_id, modified_at, tags, revision
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                tracker_project = EXCLUDED.tracker_project,
                area = EXCLUDED.area,
                project_id = EXCLUDED.project_id,
                release_id = EXCLUDED.release_id,
                modified_at = EXCLUDED.modified_at,
                tags = EXCLUDED.tags,
                revision = EXCLUDED.revision
            "#,
            vec![
                imported.id.into(),
                imported.title.clone().into(),
                imported.description.clone().into(),
                imported.tracker_project.clone().into(),
                imported.area.clone().into(),
                project_id.into(),
                release_id.into(),
                imported.modified_at.into(),
                tags_json(&imported.tags).into(),
                imported.revision.clone().into(),
            ],
        ))
        .await
        .map_err(|e| AppError::Database(format!("Failed to upsert case: {}", e)))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit case upsert: {}", e)))?;

        self.get_case(imported.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Case {}", imported.id)))
    }

    /// Get a case by its tracker id.
    pub async fn get_case(&self, id: i64) -> AppResult<Option<case::Model>> {
        let result = Case::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get case: {}", e)))?;

        Ok(result)
    }

    /// Ids of every local case.
    pub async fn list_case_ids(&self) -> AppResult<Vec<i64>> {
        let result: Vec<i64> = Case::find()
            .select_only()
            .column(case::Column::Id)
            .order_by_asc(case::Column::Id)
            .into_tuple()
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list cases: {}", e)))?;

        Ok(result)
    }

    /// Current tags of the given cases.
    pub async fn tags_by_case(&self, ids: &[i64]) -> AppResult<HashMap<i64, Vec<String>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let cases = Case::find()
            .filter(case::Column::Id.is_in(ids.iter().copied()))
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get case tags: {}", e)))?;

        Ok(cases.into_iter().map(|c| (c.id, c.tag_list())).collect())
    }
}

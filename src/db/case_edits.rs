//! PostgreSQL outbox store.
//!
//! A drain holds its case's rows with `FOR UPDATE NOWAIT` inside one
//! transaction. An enqueue touching a locked row waits for that transaction,
//! so an edit recorded during a drain lands after it instead of being lost.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseBackend, DatabaseTransaction, EntityTrait, FromQueryResult,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Statement, TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

use crate::entity::case_edit::{self, Entity as CaseEditEntity};
use crate::error::{AppError, AppResult};
use crate::models::{CaseEdit, EditIntent};
use crate::services::outbox::{LockedBatch, OutboxStore};
use crate::services::tracker::CaseRecord;

use super::{DbPool, cases, is_lock_unavailable};

#[derive(Debug, FromQueryResult)]
struct IdRow {
    id: Uuid,
}

fn to_case_edit(model: case_edit::Model) -> AppResult<CaseEdit> {
    let intent = EditIntent::from_json(&model.params).map_err(|e| {
        AppError::Database(format!("Invalid params on case edit {}: {}", model.id, e))
    })?;

    Ok(CaseEdit {
        id: model.id,
        case_id: model.case_id,
        intent,
        created_at: model.created_at,
    })
}

/// Outbox backed by the `case_edits` table.
#[derive(Clone)]
pub struct PgOutbox {
    pool: DbPool,
}

impl PgOutbox {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for PgOutbox {
    type Batch = PgBatch;

    async fn enqueue(&self, case_id: i64, intent: &EditIntent) -> AppResult<Uuid> {
        let edit_type = intent.edit_type();
        let txn = self
            .pool
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        if let Some(superseded) = edit_type.superseded() {
            CaseEditEntity::delete_many()
                .filter(case_edit::Column::CaseId.eq(case_id))
                .filter(case_edit::Column::EditType.eq(superseded.as_str()))
                .exec(&txn)
                .await
                .map_err(|e| {
                    AppError::Database(format!("Failed to delete superseded edit: {}", e))
                })?;
        }

        let row = IdRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            INSERT INTO case_edits (id, case_id, edit_type, target_digest, params, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (case_id, edit_type, target_digest)
                DO UPDATE SET params = EXCLUDED.params
            RETURNING id
            "#,
            vec![
                Uuid::now_v7().into(),
                case_id.into(),
                edit_type.as_str().into(),
                intent.target_digest().into(),
                intent.to_json().into(),
                Utc::now().into(),
            ],
        ))
        .one(&txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to enqueue case edit: {}", e)))?
        .ok_or_else(|| AppError::Database("Case edit enqueue returned no row".to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit case edit: {}", e)))?;

        Ok(row.id)
    }

    async fn enqueue_if_absent(
        &self,
        case_id: i64,
        intent: &EditIntent,
    ) -> AppResult<Option<Uuid>> {
        let edit_type = intent.edit_type();
        let superseded = edit_type.superseded().map(|t| t.as_str().to_string());

        let row = IdRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            INSERT INTO case_edits (id, case_id, edit_type, target_digest, params, created_at)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE NOT EXISTS (
                SELECT 1 FROM case_edits WHERE case_id = $2 AND edit_type = $7
            )
            ON CONFLICT (case_id, edit_type, target_digest) DO NOTHING
            RETURNING id
            "#,
            vec![
                Uuid::now_v7().into(),
                case_id.into(),
                edit_type.as_str().into(),
                intent.target_digest().into(),
                intent.to_json().into(),
                Utc::now().into(),
                superseded.into(),
            ],
        ))
        .one(self.pool.connection())
        .await
        .map_err(|e| AppError::Database(format!("Failed to enqueue case edit: {}", e)))?;

        Ok(row.map(|r| r.id))
    }

    async fn pending_for(&self, case_id: i64) -> AppResult<Vec<CaseEdit>> {
        let models = CaseEditEntity::find()
            .filter(case_edit::Column::CaseId.eq(case_id))
            .order_by_asc(case_edit::Column::CreatedAt)
            .order_by_asc(case_edit::Column::Id)
            .all(self.pool.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get case edits: {}", e)))?;

        models.into_iter().map(to_case_edit).collect()
    }

    async fn pending_count(&self, case_id: i64) -> AppResult<u64> {
        CaseEditEntity::find()
            .filter(case_edit::Column::CaseId.eq(case_id))
            .count(self.pool.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count case edits: {}", e)))
    }

    async fn cases_with_pending(&self) -> AppResult<Vec<i64>> {
        let result: Vec<i64> = CaseEditEntity::find()
            .select_only()
            .column(case_edit::Column::CaseId)
            .distinct()
            .order_by_asc(case_edit::Column::CaseId)
            .into_tuple()
            .all(self.pool.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list pending cases: {}", e)))?;

        Ok(result)
    }

    async fn try_lock(&self, case_id: i64) -> AppResult<Option<PgBatch>> {
        let txn = self
            .pool
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let locked = case_edit::Model::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            SELECT id, case_id, edit_type, target_digest, params, created_at
            FROM case_edits
            WHERE case_id = $1
            ORDER BY created_at ASC, id ASC
            FOR UPDATE NOWAIT
            "#,
            vec![case_id.into()],
        ))
        .all(&txn)
        .await;

        let models = match locked {
            Ok(models) => models,
            Err(e) if is_lock_unavailable(&e) => {
                debug!("Case {} edits are locked by another drain", case_id);
                txn.rollback().await.map_err(|e| {
                    AppError::Database(format!("Failed to roll back lock attempt: {}", e))
                })?;
                return Ok(None);
            }
            Err(e) => {
                return Err(AppError::Database(format!(
                    "Failed to lock case edits: {}",
                    e
                )));
            }
        };

        let edits = models
            .into_iter()
            .map(to_case_edit)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Some(PgBatch {
            txn,
            case_id,
            edits,
        }))
    }
}

/// Locked edits of one case; the row locks live as long as `txn`.
pub struct PgBatch {
    txn: DatabaseTransaction,
    case_id: i64,
    edits: Vec<CaseEdit>,
}

#[async_trait]
impl LockedBatch for PgBatch {
    fn case_id(&self) -> i64 {
        self.case_id
    }

    fn edits(&self) -> &[CaseEdit] {
        &self.edits
    }

    async fn complete(self, processed: &[Uuid], refreshed: Option<&CaseRecord>) -> AppResult<()> {
        if !processed.is_empty() {
            CaseEditEntity::delete_many()
                .filter(case_edit::Column::Id.is_in(processed.iter().copied()))
                .exec(&self.txn)
                .await
                .map_err(|e| AppError::Database(format!("Failed to delete case edits: {}", e)))?;
        }

        if let Some(record) = refreshed {
            cases::update_case_tags(&self.txn, self.case_id, &record.tags).await?;
        }

        self.txn
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit drain: {}", e)))
    }

    async fn abort(self) -> AppResult<()> {
        self.txn
            .rollback()
            .await
            .map_err(|e| AppError::Database(format!("Failed to roll back drain: {}", e)))
    }
}

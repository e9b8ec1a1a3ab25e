//! Database queries for migrations and their steps.

use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, EntityTrait,
    FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Set, Statement, TransactionTrait,
};
use uuid::Uuid;

use crate::entity::case::Entity as Case;
use crate::entity::migration::{self, ActiveModel, Entity as Migration};
use crate::entity::migration_step::{self, Entity as MigrationStep};
use crate::error::{AppError, AppResult};
use crate::models::{
    MigrationCategory, MigrationStepView, MigrationView, StepPhase, StepType,
    UpsertMigrationRequest,
};
use crate::services::orderer::{self, ParentMap};

use super::DbPool;

/// A migration of a project with its release and the report status on the
/// filtered instance, if any.
#[derive(Debug, Clone, FromQueryResult)]
pub struct ProjectMigrationRow {
    pub id: Uuid,
    pub uid: String,
    pub parent_uid: Option<String>,
    pub case_id: i64,
    pub category: String,
    pub reviewed: bool,
    pub release_name: String,
    pub report_status: Option<String>,
}

impl ProjectMigrationRow {
    pub fn view(&self, steps: &[migration_step::Model]) -> AppResult<MigrationView> {
        Ok(MigrationView {
            id: self.id,
            uid: self.uid.clone(),
            parent: self.parent_uid.clone(),
            case_id: self.case_id,
            category: MigrationCategory::parse(&self.category).unwrap_or_default(),
            reviewed: self.reviewed,
            steps: steps.iter().map(step_view).collect::<AppResult<Vec<_>>>()?,
        })
    }
}

/// Outcome of a create-or-update.
#[derive(Debug, Clone)]
pub struct UpsertedMigration {
    pub migration: migration::Model,
    pub created: bool,
}

/// Steps of a migration ordered by phase, then position.
pub async fn steps_for<C: ConnectionTrait>(
    conn: &C,
    migration_id: Uuid,
) -> AppResult<Vec<migration_step::Model>> {
    let mut steps = MigrationStep::find()
        .filter(migration_step::Column::MigrationId.eq(migration_id))
        .all(conn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to get migration steps: {}", e)))?;

    steps.sort_by_key(|s| (StepPhase::parse(&s.phase), s.position));
    Ok(steps)
}

pub fn step_view(step: &migration_step::Model) -> AppResult<MigrationStepView> {
    Ok(MigrationStepView {
        id: step.id,
        phase: StepPhase::parse(&step.phase)
            .ok_or_else(|| AppError::Database(format!("Unknown step phase '{}'", step.phase)))?,
        step_type: StepType::parse(&step.step_type).ok_or_else(|| {
            AppError::Database(format!("Unknown step type '{}'", step.step_type))
        })?,
        position: step.position,
        code: step.code.clone(),
        path: step.path.clone(),
    })
}

pub fn migration_view(
    model: &migration::Model,
    steps: &[migration_step::Model],
) -> AppResult<MigrationView> {
    Ok(MigrationView {
        id: model.id,
        uid: model.uid.clone(),
        parent: model.parent_uid.clone(),
        case_id: model.case_id,
        category: MigrationCategory::parse(&model.category).unwrap_or_default(),
        reviewed: model.reviewed,
        steps: steps.iter().map(step_view).collect::<AppResult<Vec<_>>>()?,
    })
}

#[derive(Debug, FromQueryResult)]
struct ParentLink {
    uid: String,
    parent_uid: Option<String>,
}

/// Parent links of every migration in a project, row-locked for the rest of
/// the transaction.
async fn project_parents_locked<C: ConnectionTrait>(
    conn: &C,
    project_id: Option<Uuid>,
) -> AppResult<ParentMap> {
    let links = ParentLink::find_by_statement(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"
        SELECT m.uid, m.parent_uid
        FROM migrations m
        INNER JOIN cases c ON c.id = m.case_id
        WHERE c.project_id IS NOT DISTINCT FROM $1
        FOR UPDATE OF m
        "#,
        vec![project_id.into()],
    ))
    .all(conn)
    .await
    .map_err(|e| AppError::Database(format!("Failed to get project migrations: {}", e)))?;

    Ok(links.into_iter().map(|l| (l.uid, l.parent_uid)).collect())
}

impl DbPool {
    /// Create or update a migration and replace its steps.
    ///
    /// Steps are matched by (phase, position): a matched step keeps its id so
    /// recorded step reports stay attached to it. The parent must be a
    /// migration of the same project and must not close a cycle.
    pub async fn upsert_migration(
        &self,
        req: &UpsertMigrationRequest,
    ) -> AppResult<UpsertedMigration> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let case = Case::find_by_id(req.case_id)
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(format!("Failed to get case: {}", e)))?
            .ok_or_else(|| AppError::NotFound(format!("Case {}", req.case_id)))?;

        if let Some(parent) = req.parent.as_deref() {
            let project = project_parents_locked(&txn, case.project_id).await?;
            orderer::check_parent(&req.uid, parent, &project).map_err(|e| {
                AppError::InvalidInput(format!("Invalid parent for migration {}: {}", req.uid, e))
            })?;
        }

        let by_case = Migration::find()
            .filter(migration::Column::CaseId.eq(req.case_id))
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(format!("Failed to get migration: {}", e)))?;
        if let Some(other) = by_case.as_ref().filter(|m| m.uid != req.uid) {
            return Err(AppError::InvalidInput(format!(
                "Case {} already has migration {}",
                req.case_id, other.uid
            )));
        }

        let existing = Migration::find()
            .filter(migration::Column::Uid.eq(req.uid.as_str()))
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(format!("Failed to get migration: {}", e)))?;

        let now = Utc::now();
        let created = existing.is_none();
        let model = match existing {
            Some(current) => {
                if current.case_id != req.case_id {
                    return Err(AppError::InvalidInput(format!(
                        "Migration {} belongs to case {}",
                        req.uid, current.case_id
                    )));
                }
                let mut active: ActiveModel = current.into();
                active.parent_uid = Set(req.parent.clone());
                active.category = Set(req.category.as_str().to_string());
                active.updated_at = Set(now);
                active
                    .update(&txn)
                    .await
                    .map_err(|e| AppError::Database(format!("Failed to update migration: {}", e)))?
            }
            None => ActiveModel {
                id: Set(Uuid::now_v7()),
                uid: Set(req.uid.clone()),
                parent_uid: Set(req.parent.clone()),
                case_id: Set(req.case_id),
                category: Set(req.category.as_str().to_string()),
                reviewed: Set(false),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert migration: {}", e)))?,
        };

        let mut current: HashMap<(String, i32), migration_step::Model> = steps_for(&txn, model.id)
            .await?
            .into_iter()
            .map(|s| ((s.phase.clone(), s.position), s))
            .collect();

        for (phase, input) in req.steps() {
            let key = (phase.as_str().to_string(), input.position);
            match current.remove(&key) {
                Some(step) => {
                    let mut active: migration_step::ActiveModel = step.into();
                    active.step_type = Set(input.step_type.as_str().to_string());
                    active.code = Set(input.code.clone());
                    active.path = Set(input.path.clone());
                    active.updated_at = Set(now);
                    active.update(&txn).await.map_err(|e| {
                        AppError::Database(format!("Failed to update migration step: {}", e))
                    })?;
                }
                None => {
                    migration_step::ActiveModel {
                        id: Set(Uuid::now_v7()),
                        migration_id: Set(model.id),
                        phase: Set(key.0),
                        step_type: Set(input.step_type.as_str().to_string()),
                        code: Set(input.code.clone()),
                        path: Set(input.path.clone()),
                        position: Set(input.position),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(&txn)
                    .await
                    .map_err(|e| {
                        AppError::Database(format!("Failed to insert migration step: {}", e))
                    })?;
                }
            }
        }

        let removed: Vec<Uuid> = current.into_values().map(|s| s.id).collect();
        if !removed.is_empty() {
            MigrationStep::delete_many()
                .filter(migration_step::Column::Id.is_in(removed))
                .exec(&txn)
                .await
                .map_err(|e| {
                    AppError::Database(format!("Failed to delete migration steps: {}", e))
                })?;
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit migration: {}", e)))?;

        Ok(UpsertedMigration {
            migration: model,
            created,
        })
    }

    /// Get a migration by uid.
    pub async fn get_migration_by_uid(&self, uid: &str) -> AppResult<Option<migration::Model>> {
        let result = Migration::find()
            .filter(migration::Column::Uid.eq(uid))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get migration: {}", e)))?;

        Ok(result)
    }

    pub async fn get_migration_steps(
        &self,
        migration_id: Uuid,
    ) -> AppResult<Vec<migration_step::Model>> {
        steps_for(self.connection(), migration_id).await
    }

    /// Set the reviewed flag; returns the migrations whose flag actually changed.
    pub async fn set_migrations_reviewed(
        &self,
        uids: &[String],
        reviewed: bool,
    ) -> AppResult<Vec<migration::Model>> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let mut changed = Vec::new();
        for uid in uids {
            let model = Migration::find()
                .filter(migration::Column::Uid.eq(uid.as_str()))
                .one(&txn)
                .await
                .map_err(|e| AppError::Database(format!("Failed to get migration: {}", e)))?
                .ok_or_else(|| AppError::NotFound(format!("Migration {}", uid)))?;

            if model.reviewed == reviewed {
                continue;
            }

            let mut active: ActiveModel = model.into();
            active.reviewed = Set(reviewed);
            active.updated_at = Set(Utc::now());
            let updated = active
                .update(&txn)
                .await
                .map_err(|e| AppError::Database(format!("Failed to update migration: {}", e)))?;
            changed.push(updated);
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit review change: {}", e)))?;

        Ok(changed)
    }

    /// Every migration of a project in creation order, with the report status
    /// on `instance` when one is given.
    pub async fn list_project_migrations(
        &self,
        project: &str,
        instance: Option<&str>,
    ) -> AppResult<Vec<ProjectMigrationRow>> {
        let sql = r#"
            SELECT
                m.id, m.uid, m.parent_uid, m.case_id, m.category, m.reviewed,
                r.name AS release_name,
                mr.status AS report_status
            FROM migrations m
            INNER JOIN cases c ON c.id = m.case_id
            INNER JOIN projects p ON p.id = c.project_id
            INNER JOIN releases r ON r.id = c.release_id
            LEFT JOIN instances i ON i.name = $2
            LEFT JOIN migration_reports mr
                ON mr.migration_id = m.id AND mr.instance_id = i.id
            WHERE p.name = $1
            ORDER BY m.created_at ASC, m.id ASC
        "#;

        let rows = ProjectMigrationRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            sql,
            vec![project.into(), instance.map(str::to_string).into()],
        ))
        .all(self.connection())
        .await
        .map_err(|e| AppError::Database(format!("Failed to list project migrations: {}", e)))?;

        Ok(rows)
    }

    /// Steps of several migrations, grouped by migration id.
    pub async fn steps_for_migrations(
        &self,
        ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, Vec<migration_step::Model>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let steps = MigrationStep::find()
            .filter(migration_step::Column::MigrationId.is_in(ids.iter().copied()))
            .order_by_asc(migration_step::Column::Position)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get migration steps: {}", e)))?;

        let mut grouped: HashMap<Uuid, Vec<migration_step::Model>> = HashMap::new();
        for step in steps {
            grouped.entry(step.migration_id).or_default().push(step);
        }
        for steps in grouped.values_mut() {
            steps.sort_by_key(|s| (StepPhase::parse(&s.phase), s.position));
        }
        Ok(grouped)
    }

    /// Cases whose migration is marked reviewed.
    pub async fn reviewed_case_ids(&self) -> AppResult<Vec<i64>> {
        let result: Vec<i64> = Migration::find()
            .select_only()
            .column(migration::Column::CaseId)
            .filter(migration::Column::Reviewed.eq(true))
            .into_tuple()
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list reviewed cases: {}", e)))?;

        Ok(result)
    }
}

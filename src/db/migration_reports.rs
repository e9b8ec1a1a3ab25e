//! Database queries for migration reports and their step reports.
//!
//! Every step report write recomputes the owning report in the same
//! transaction, with the report row locked so concurrent writers for the
//! same (migration, instance) serialize.

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseTransaction, EntityTrait,
    FromQueryResult, QueryFilter, QuerySelect, Statement, TransactionTrait,
};
use uuid::Uuid;

use crate::entity::migration;
use crate::entity::migration_report::{self, Entity as MigrationReport};
use crate::entity::migration_step_report::{self, Entity as MigrationStepReport};
use crate::error::{AppError, AppResult};
use crate::models::{MigrationReportStatus, MigrationReportView, StepPhase, StepReportStatus};
use crate::services::aggregator::{self, StepOutcome, StepRef};
use crate::services::notify::MigrationFact;

use super::{DbPool, migrations, reference};

/// One step outcome to record.
#[derive(Debug, Clone)]
pub struct StepWrite {
    pub step_id: Uuid,
    pub status: StepReportStatus,
    pub log: String,
}

/// Result of recording step outcomes on one report.
#[derive(Debug, Clone)]
pub struct RecordedReport {
    pub step_report_ids: Vec<Uuid>,
    pub report: MigrationReportView,
    pub previous: MigrationReportStatus,
}

impl RecordedReport {
    pub fn status_changed(&self) -> bool {
        self.previous != self.report.status
    }
}

#[derive(Debug, FromQueryResult)]
struct IdRow {
    id: Uuid,
}

#[derive(Debug, FromQueryResult)]
struct AppliedRow {
    case_id: i64,
    instance: String,
    report_id: Uuid,
}

fn report_view(model: &migration_report::Model) -> MigrationReportView {
    MigrationReportView {
        id: model.id,
        migration_id: model.migration_id,
        instance_id: model.instance_id,
        status: MigrationReportStatus::parse(&model.status)
            .unwrap_or(MigrationReportStatus::Error),
        log: model.log.clone(),
        timestamp: model.timestamp,
    }
}

/// Get or create the report for (migration, instance) and lock its row.
async fn lock_report(
    txn: &DatabaseTransaction,
    migration_id: Uuid,
    instance_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<migration_report::Model> {
    txn.execute_raw(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"
        INSERT INTO migration_reports (id, migration_id, instance_id, status, log, timestamp)
        VALUES ($1, $2, $3, $4, '', $5)
        ON CONFLICT (migration_id, instance_id) DO NOTHING
        "#,
        vec![
            Uuid::now_v7().into(),
            migration_id.into(),
            instance_id.into(),
            MigrationReportStatus::Error.as_str().into(),
            now.into(),
        ],
    ))
    .await
    .map_err(|e| AppError::Database(format!("Failed to create migration report: {}", e)))?;

    MigrationReport::find()
        .filter(migration_report::Column::MigrationId.eq(migration_id))
        .filter(migration_report::Column::InstanceId.eq(instance_id))
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to lock migration report: {}", e)))?
        .ok_or_else(|| AppError::Database("Migration report vanished after insert".to_string()))
}

async fn upsert_step_report(
    txn: &DatabaseTransaction,
    report_id: Uuid,
    write: &StepWrite,
    now: DateTime<Utc>,
) -> AppResult<Uuid> {
    let row = IdRow::find_by_statement(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"
        INSERT INTO migration_step_reports (id, report_id, step_id, status, log, timestamp)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (report_id, step_id) DO UPDATE SET
            status = EXCLUDED.status,
            log = EXCLUDED.log,
            timestamp = EXCLUDED.timestamp
        RETURNING id
        "#,
        vec![
            Uuid::now_v7().into(),
            report_id.into(),
            write.step_id.into(),
            write.status.as_str().into(),
            write.log.clone().into(),
            now.into(),
        ],
    ))
    .one(txn)
    .await
    .map_err(|e| AppError::Database(format!("Failed to upsert step report: {}", e)))?
    .ok_or_else(|| AppError::Database("Step report upsert returned no row".to_string()))?;

    Ok(row.id)
}

/// Recompute a locked report from its current steps and step reports.
async fn recompute_report(
    txn: &DatabaseTransaction,
    report: &migration_report::Model,
    now: DateTime<Utc>,
) -> AppResult<migration_report::Model> {
    let steps: Vec<StepRef> = migrations::steps_for(txn, report.migration_id)
        .await?
        .iter()
        .filter_map(|s| {
            StepPhase::parse(&s.phase).map(|phase| StepRef {
                id: s.id,
                phase,
                position: s.position,
            })
        })
        .collect();

    let outcomes: Vec<StepOutcome> = MigrationStepReport::find()
        .filter(migration_step_report::Column::ReportId.eq(report.id))
        .all(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to get step reports: {}", e)))?
        .into_iter()
        .map(|r| StepOutcome {
            step_id: r.step_id,
            status: StepReportStatus::parse_lossy(&r.status),
            log: r.log,
            recorded_at: r.timestamp,
        })
        .collect();

    let aggregate = aggregator::recompute(&steps, &outcomes);

    txn.execute_raw(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        "UPDATE migration_reports SET status = $1, log = $2, timestamp = $3 WHERE id = $4",
        vec![
            aggregate.status.as_str().into(),
            aggregate.log.clone().into(),
            now.into(),
            report.id.into(),
        ],
    ))
    .await
    .map_err(|e| AppError::Database(format!("Failed to update migration report: {}", e)))?;

    Ok(migration_report::Model {
        status: aggregate.status.as_str().to_string(),
        log: aggregate.log,
        timestamp: now,
        ..report.clone()
    })
}

impl DbPool {
    /// Record step outcomes of a migration on an instance and recompute the report.
    ///
    /// Every written step must currently belong to the migration.
    pub async fn record_step_reports(
        &self,
        migration: &migration::Model,
        instance: &str,
        writes: &[StepWrite],
    ) -> AppResult<RecordedReport> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let steps = migrations::steps_for(&txn, migration.id).await?;
        if let Some(unknown) = writes
            .iter()
            .find(|w| !steps.iter().any(|s| s.id == w.step_id))
        {
            return Err(AppError::NotFound(format!(
                "Step {} of migration {}",
                unknown.step_id, migration.uid
            )));
        }

        let now = Utc::now();
        let instance_id = reference::ensure_instance(&txn, instance).await?;
        let report = lock_report(&txn, migration.id, instance_id, now).await?;
        let previous =
            MigrationReportStatus::parse(&report.status).unwrap_or(MigrationReportStatus::Error);

        let mut step_report_ids = Vec::with_capacity(writes.len());
        for write in writes {
            step_report_ids.push(upsert_step_report(&txn, report.id, write, now).await?);
        }

        let updated = recompute_report(&txn, &report, now).await?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit step report: {}", e)))?;

        Ok(RecordedReport {
            step_report_ids,
            report: report_view(&updated),
            previous,
        })
    }

    /// Get the report of a migration on an instance.
    pub async fn get_migration_report(
        &self,
        migration_id: Uuid,
        instance_id: Uuid,
    ) -> AppResult<Option<MigrationReportView>> {
        let result = MigrationReport::find()
            .filter(migration_report::Column::MigrationId.eq(migration_id))
            .filter(migration_report::Column::InstanceId.eq(instance_id))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get migration report: {}", e)))?;

        Ok(result.as_ref().map(report_view))
    }

    /// Every applied migration report with its case and instance name.
    pub async fn applied_migration_facts(&self) -> AppResult<Vec<MigrationFact>> {
        let rows = AppliedRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            SELECT m.case_id, i.name AS instance, mr.id AS report_id
            FROM migration_reports mr
            INNER JOIN migrations m ON m.id = mr.migration_id
            INNER JOIN instances i ON i.id = mr.instance_id
            WHERE mr.status = $1
            ORDER BY m.case_id, i.name
            "#,
            vec![MigrationReportStatus::Applied.as_str().into()],
        ))
        .all(self.connection())
        .await
        .map_err(|e| AppError::Database(format!("Failed to list applied migrations: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|r| MigrationFact {
                case_id: r.case_id,
                instance: r.instance,
                report_id: r.report_id,
            })
            .collect())
    }
}

//! Database queries for deployment reports.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseBackend, EntityTrait, FromQueryResult, QueryFilter,
    QuerySelect, Set, Statement, TransactionTrait,
};
use tracing::warn;
use uuid::Uuid;

use crate::entity::case::{self, Entity as Case};
use crate::entity::deployment_report;
use crate::entity::deployment_report_case;
use crate::error::{AppError, AppResult};
use crate::models::{DeploymentReportView, DeploymentStatus, RecordDeploymentRequest};
use crate::services::notify::DeploymentFact;

use super::{DbPool, reference};

#[derive(Debug, FromQueryResult)]
struct DeploymentFactRow {
    case_id: i64,
    instance: String,
    report_id: Uuid,
    status: String,
    timestamp: DateTime<Utc>,
}

impl DbPool {
    /// Record a deployment run and link it to the covered cases.
    ///
    /// Case ids unknown locally are dropped from the report.
    pub async fn record_deployment(
        &self,
        req: &RecordDeploymentRequest,
    ) -> AppResult<DeploymentReportView> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let instance_id = reference::ensure_instance(&txn, &req.instance).await?;
        let release_id = match req.release.as_deref() {
            Some(name) => Some(reference::ensure_release(&txn, name, None).await?),
            None => None,
        };

        let now = Utc::now();
        let report = deployment_report::ActiveModel {
            id: Set(Uuid::now_v7()),
            instance_id: Set(instance_id),
            release_id: Set(release_id),
            status: Set(req.status.as_str().to_string()),
            log: Set(req.log.clone()),
            timestamp: Set(now),
            created_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert deployment report: {}", e)))?;

        let mut known: Vec<i64> = if req.cases.is_empty() {
            Vec::new()
        } else {
            Case::find()
                .select_only()
                .column(case::Column::Id)
                .filter(case::Column::Id.is_in(req.cases.iter().copied()))
                .into_tuple()
                .all(&txn)
                .await
                .map_err(|e| AppError::Database(format!("Failed to get cases: {}", e)))?
        };
        known.sort_unstable();

        let unknown: Vec<i64> = req
            .cases
            .iter()
            .copied()
            .filter(|id| known.binary_search(id).is_err())
            .collect();
        if !unknown.is_empty() {
            warn!(
                "Deployment report {} references unknown cases {:?}",
                report.id, unknown
            );
        }

        if !known.is_empty() {
            deployment_report_case::Entity::insert_many(known.iter().map(|case_id| {
                deployment_report_case::ActiveModel {
                    deployment_report_id: Set(report.id),
                    case_id: Set(*case_id),
                }
            }))
            .exec(&txn)
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to link deployment report cases: {}", e))
            })?;
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit deployment report: {}", e)))?;

        Ok(DeploymentReportView {
            id: report.id,
            instance_id,
            release_id,
            status: req.status,
            log: report.log,
            cases: known,
            timestamp: report.timestamp,
        })
    }

    /// Every (case, deployment report) pair with the instance name.
    pub async fn deployment_facts(&self) -> AppResult<Vec<DeploymentFact>> {
        let rows = DeploymentFactRow::find_by_statement(Statement::from_string(
            DatabaseBackend::Postgres,
            r#"
            SELECT drc.case_id, i.name AS instance, dr.id AS report_id, dr.status, dr.timestamp
            FROM deployment_report_cases drc
            INNER JOIN deployment_reports dr ON dr.id = drc.deployment_report_id
            INNER JOIN instances i ON i.id = dr.instance_id
            "#,
        ))
        .all(self.connection())
        .await
        .map_err(|e| AppError::Database(format!("Failed to list deployment facts: {}", e)))?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                DeploymentStatus::parse(&r.status).map(|status| DeploymentFact {
                    case_id: r.case_id,
                    instance: r.instance,
                    report_id: r.report_id,
                    status,
                    timestamp: r.timestamp,
                })
            })
            .collect())
    }
}

//! Report write paths.

use tracing::info;

use crate::db::DbPool;
use crate::db::migration_reports::StepWrite;
use crate::error::{AppError, AppResult};
use crate::models::{
    DeploymentReportView, RecordDeploymentRequest, RecordStepReportRequest, StepReportResponse,
};
use crate::services::events::DomainEvent;

/// Record one step outcome and recompute the migration report.
pub async fn record_step_report(
    pool: &DbPool,
    req: &RecordStepReportRequest,
) -> AppResult<(StepReportResponse, Vec<DomainEvent>)> {
    if req.instance.trim().is_empty() {
        return Err(AppError::InvalidInput("instance must not be empty".to_string()));
    }

    let migration = pool
        .get_migration_by_uid(&req.migration_uid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Migration {}", req.migration_uid)))?;

    let write = StepWrite {
        step_id: req.step_id,
        status: req.status,
        log: req.log.clone(),
    };
    let recorded = pool
        .record_step_reports(&migration, &req.instance, std::slice::from_ref(&write))
        .await?;

    let status_changed = recorded.status_changed();
    let mut events = Vec::new();
    if status_changed {
        info!(
            "Migration {} on {} is now {}",
            migration.uid, req.instance, recorded.report.status
        );
        events.push(DomainEvent::MigrationReportChanged {
            case_id: migration.case_id,
            instance: req.instance.clone(),
            report_id: recorded.report.id,
            status: recorded.report.status,
        });
    }

    let step_report_id = recorded
        .step_report_ids
        .first()
        .copied()
        .ok_or_else(|| AppError::Database("Step report was not recorded".to_string()))?;

    Ok((
        StepReportResponse {
            step_report_id,
            report: recorded.report,
            status_changed,
        },
        events,
    ))
}

/// Record a deployment run; every covered case gets notified.
pub async fn record_deployment(
    pool: &DbPool,
    req: &RecordDeploymentRequest,
) -> AppResult<(DeploymentReportView, Vec<DomainEvent>)> {
    if req.instance.trim().is_empty() {
        return Err(AppError::InvalidInput("instance must not be empty".to_string()));
    }

    let report = pool.record_deployment(req).await?;
    info!(
        "Deployment {} on {} recorded as {} for {} cases",
        report.id,
        req.instance,
        report.status,
        report.cases.len()
    );

    let events = if report.cases.is_empty() {
        Vec::new()
    } else {
        vec![DomainEvent::DeploymentReportLogged {
            case_ids: report.cases.clone(),
            instance: req.instance.clone(),
            report_id: report.id,
            status: report.status,
        }]
    };

    Ok((report, events))
}

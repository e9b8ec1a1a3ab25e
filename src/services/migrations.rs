//! Migration write paths and the sorted listing.

use tracing::info;

use crate::db::DbPool;
use crate::db::migration_reports::StepWrite;
use crate::db::migrations::{ProjectMigrationRow, migration_view};
use crate::error::{AppError, AppResult};
use crate::models::{
    MigrationCategory, MigrationFilter, MigrationReportStatus, MigrationReportView, MigrationView,
    ReviewMigrationsRequest, StampMigrationsRequest, StepReportStatus, UpsertMigrationRequest,
};
use crate::services::events::DomainEvent;
use crate::services::orderer::{self, Dependent};

impl Dependent for ProjectMigrationRow {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn parent_uid(&self) -> Option<&str> {
        self.parent_uid.as_deref()
    }
}

/// Create or update a migration. A new migration gets linked on its case.
pub async fn upsert_migration(
    pool: &DbPool,
    req: &UpsertMigrationRequest,
) -> AppResult<(MigrationView, Vec<DomainEvent>)> {
    req.validate().map_err(AppError::InvalidInput)?;

    let upserted = pool.upsert_migration(req).await?;
    let steps = pool.get_migration_steps(upserted.migration.id).await?;
    let view = migration_view(&upserted.migration, &steps)?;

    let events = if upserted.created {
        info!("Created migration {} for case {}", view.uid, view.case_id);
        vec![DomainEvent::MigrationCreated {
            case_id: view.case_id,
            uid: view.uid.clone(),
        }]
    } else {
        Vec::new()
    };

    Ok((view, events))
}

/// Flip the reviewed flag; only actual changes produce events.
pub async fn review_migrations(
    pool: &DbPool,
    req: &ReviewMigrationsRequest,
) -> AppResult<Vec<DomainEvent>> {
    let changed = pool.set_migrations_reviewed(&req.uids, req.reviewed).await?;

    Ok(changed
        .into_iter()
        .map(|m| DomainEvent::MigrationReviewChanged {
            case_id: m.case_id,
            reviewed: m.reviewed,
        })
        .collect())
}

/// Record Applied for every step of the selected migrations on an instance.
pub async fn stamp_migrations(
    pool: &DbPool,
    req: &StampMigrationsRequest,
) -> AppResult<(Vec<MigrationReportView>, Vec<DomainEvent>)> {
    if req.instance.trim().is_empty() {
        return Err(AppError::InvalidInput("instance must not be empty".to_string()));
    }

    let mut reports = Vec::with_capacity(req.uids.len());
    let mut events = Vec::new();

    for uid in &req.uids {
        let migration = pool
            .get_migration_by_uid(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Migration {}", uid)))?;

        let writes: Vec<StepWrite> = pool
            .get_migration_steps(migration.id)
            .await?
            .into_iter()
            .map(|step| StepWrite {
                step_id: step.id,
                status: StepReportStatus::Applied,
                log: req.log.clone(),
            })
            .collect();

        let recorded = pool
            .record_step_reports(&migration, &req.instance, &writes)
            .await?;
        if recorded.status_changed() {
            events.push(DomainEvent::MigrationReportChanged {
                case_id: migration.case_id,
                instance: req.instance.clone(),
                report_id: recorded.report.id,
                status: recorded.report.status,
            });
        }
        reports.push(recorded.report);
    }

    info!(
        "Stamped {} migrations as applied on {}",
        reports.len(),
        req.instance
    );
    Ok((reports, events))
}

/// Apply every listing filter except the ordering.
pub fn filter_rows(
    rows: &[ProjectMigrationRow],
    filter: &MigrationFilter,
) -> Vec<ProjectMigrationRow> {
    rows.iter()
        .filter(|row| filter.reviewed.is_none_or(|r| row.reviewed == r))
        .filter(|row| {
            filter
                .category
                .is_none_or(|c| MigrationCategory::parse(&row.category) == Some(c))
        })
        .filter(|row| {
            filter
                .release
                .as_deref()
                .is_none_or(|release| row.release_name == release)
        })
        .filter(|row| {
            let status = row
                .report_status
                .as_deref()
                .and_then(MigrationReportStatus::parse);
            filter.matches_report(status)
        })
        .cloned()
        .collect()
}

/// Migrations of a project matching `filter`, parents first.
pub async fn sorted_migrations(
    pool: &DbPool,
    project: &str,
    filter: &MigrationFilter,
) -> AppResult<Vec<MigrationView>> {
    filter.validate().map_err(AppError::InvalidInput)?;

    if pool.get_project_by_name(project).await?.is_none() {
        return Err(AppError::NotFound(format!("Project {}", project)));
    }

    let rows = pool
        .list_project_migrations(project, filter.instance.as_deref())
        .await?;
    let project_parents = orderer::parent_map(&rows);

    let ordered = orderer::sort(filter_rows(&rows, filter), &project_parents)?;

    let ids: Vec<_> = ordered.iter().map(|r| r.id).collect();
    let mut steps = pool.steps_for_migrations(&ids).await?;

    ordered
        .iter()
        .map(|row| row.view(&steps.remove(&row.id).unwrap_or_default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn row(uid: &str, release: &str, status: Option<&str>, reviewed: bool) -> ProjectMigrationRow {
        ProjectMigrationRow {
            id: Uuid::now_v7(),
            uid: uid.to_string(),
            parent_uid: None,
            case_id: 1,
            category: "online".to_string(),
            reviewed,
            release_name: release.to_string(),
            report_status: status.map(str::to_string),
        }
    }

    fn uids(rows: &[ProjectMigrationRow]) -> Vec<&str> {
        rows.iter().map(|r| r.uid.as_str()).collect()
    }

    #[test]
    fn test_exclude_status_keeps_missing_reports() {
        let rows = vec![
            row("a", "r1", Some("applied"), true),
            row("b", "r1", None, true),
            row("c", "r1", Some("error"), true),
        ];
        let filter = MigrationFilter {
            instance: Some("prod".to_string()),
            exclude_status: Some(MigrationReportStatus::Applied),
            ..Default::default()
        };
        assert_eq!(uids(&filter_rows(&rows, &filter)), vec!["b", "c"]);
    }

    #[test]
    fn test_release_and_review_filters() {
        let rows = vec![
            row("a", "r1", None, true),
            row("b", "r2", None, true),
            row("c", "r1", None, false),
        ];
        let filter = MigrationFilter {
            release: Some("r1".to_string()),
            reviewed: Some(true),
            ..Default::default()
        };
        assert_eq!(uids(&filter_rows(&rows, &filter)), vec!["a"]);
    }

    fn child_of(
        uid: &str,
        parent: &str,
        release: &str,
        status: Option<&str>,
    ) -> ProjectMigrationRow {
        let mut child = row(uid, release, status, true);
        child.parent_uid = Some(parent.to_string());
        child
    }

    #[test]
    fn test_filtered_out_parent_counts_as_satisfied() {
        let rows = vec![
            row("parent", "r1", None, true),
            child_of("child", "parent", "r2", None),
        ];

        let filter = MigrationFilter {
            release: Some("r2".to_string()),
            ..Default::default()
        };
        let project = orderer::parent_map(&rows);
        let ordered = orderer::sort(filter_rows(&rows, &filter), &project).unwrap();
        assert_eq!(uids(&ordered), vec!["child"]);
    }

    #[test]
    fn test_filtered_out_intermediate_keeps_grandchild_after_root() {
        // Listed newest first so creation order alone would put "c" ahead.
        let rows = vec![
            child_of("c", "b", "r1", None),
            child_of("b", "a", "r1", Some("applied")),
            row("a", "r1", None, true),
        ];

        let filter = MigrationFilter {
            instance: Some("prod".to_string()),
            exclude_status: Some(MigrationReportStatus::Applied),
            ..Default::default()
        };
        let project = orderer::parent_map(&rows);
        let ordered = orderer::sort(filter_rows(&rows, &filter), &project).unwrap();
        assert_eq!(uids(&ordered), vec!["a", "c"]);
    }
}

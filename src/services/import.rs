//! Case import from the tracker.
//!
//! Cases are mirrored locally only once their milestone is known; the
//! milestone becomes the case's release.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::config::TrackerSettings;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::ImportedCase;
use crate::services::tracker::{CaseRecord, CaseTracker};

/// Custom fields the import reads from a case record.
#[derive(Debug, Clone)]
pub struct ImportFields {
    pub ci_project: String,
    pub revision: String,
}

impl From<&TrackerSettings> for ImportFields {
    fn from(settings: &TrackerSettings) -> Self {
        Self {
            ci_project: settings.ci_project_field.clone(),
            revision: settings.revision_field.clone(),
        }
    }
}

/// What importing one case did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported,
    /// The case has no milestone.
    Skipped,
}

/// Map a tracker record to local case fields; `None` without a milestone.
pub fn to_imported(record: &CaseRecord, fields: &ImportFields) -> Option<ImportedCase> {
    let release = record
        .milestone
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())?;

    Some(ImportedCase {
        id: record.id,
        title: record.title.clone(),
        description: record.description.clone(),
        tracker_project: record.project.clone(),
        area: record.area.clone(),
        release: release.to_string(),
        release_date: record.milestone_date.map(|d| d.date_naive()),
        ci_project: record.custom_field(&fields.ci_project).map(str::to_string),
        modified_at: record.last_updated,
        tags: record.tags.clone(),
        revision: record.custom_field(&fields.revision).map(str::to_string),
    })
}

/// Search query matching every case of a milestone.
pub fn milestone_query(release: &str) -> String {
    format!("milestone:\"{}\"", release.replace('"', "\\\""))
}

/// Fetch one case from the tracker and upsert it.
pub async fn import_case(
    pool: &DbPool,
    tracker: &dyn CaseTracker,
    fields: &ImportFields,
    case_id: i64,
) -> AppResult<ImportOutcome> {
    let record = tracker
        .fetch_case(case_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Tracker case {}", case_id)))?;

    let Some(imported) = to_imported(&record, fields) else {
        warn!("Case {} has no milestone, skipping import", case_id);
        return Ok(ImportOutcome::Skipped);
    };

    pool.upsert_case(&imported).await?;
    Ok(ImportOutcome::Imported)
}

/// Case ids to import: every case of a known release plus every local case.
pub async fn discover_case_ids(pool: &DbPool, tracker: &dyn CaseTracker) -> AppResult<Vec<i64>> {
    let mut ids: BTreeSet<i64> = pool.list_case_ids().await?.into_iter().collect();
    let columns = vec!["ixBug".to_string()];

    for release in pool.list_releases().await? {
        let found = tracker.search(&milestone_query(&release.name), &columns).await?;
        ids.extend(found.into_iter().map(|c| c.id));
    }

    info!("Import found {} cases", ids.len());
    Ok(ids.into_iter().collect())
}

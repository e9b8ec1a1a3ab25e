//! Notify sweep: find terminal states the tracker does not show yet.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{DeploymentStatus, EditIntent, MigrationReportStatus};
use crate::services::outbox::OutboxStore;

/// A deployment report as seen from one covered case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentFact {
    pub case_id: i64,
    pub instance: String,
    pub report_id: Uuid,
    pub status: DeploymentStatus,
    pub timestamp: DateTime<Utc>,
}

/// An applied migration report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFact {
    pub case_id: i64,
    pub instance: String,
    pub report_id: Uuid,
}

/// Intents describing every terminal state reached per case.
///
/// Only the newest deployment report of a (case, instance) counts, so a
/// failed redeploy after a success is not reported as deployed.
pub fn achievements(
    migrations: Vec<MigrationFact>,
    deployments: Vec<DeploymentFact>,
    reviewed_cases: Vec<i64>,
) -> Vec<(i64, EditIntent)> {
    let mut latest: HashMap<(i64, String), DeploymentFact> = HashMap::new();
    for fact in deployments {
        let key = (fact.case_id, fact.instance.clone());
        let newer = latest.get(&key).is_none_or(|current| {
            (fact.timestamp, fact.report_id) > (current.timestamp, current.report_id)
        });
        if newer {
            latest.insert(key, fact);
        }
    }

    let mut deployed: Vec<DeploymentFact> = latest
        .into_values()
        .filter(|f| f.status == DeploymentStatus::Deployed)
        .collect();
    deployed.sort_by(|a, b| (a.case_id, &a.instance).cmp(&(b.case_id, &b.instance)));

    let migrated = migrations.into_iter().map(|m| {
        (
            m.case_id,
            EditIntent::MigrationReportChanged {
                instance: m.instance,
                report_id: m.report_id,
                status: MigrationReportStatus::Applied,
            },
        )
    });

    let deployed = deployed.into_iter().map(|d| {
        (
            d.case_id,
            EditIntent::DeploymentReportChanged {
                instance: d.instance,
                report_id: d.report_id,
                status: DeploymentStatus::Deployed,
            },
        )
    });

    let reviewed = reviewed_cases
        .into_iter()
        .map(|case_id| (case_id, EditIntent::MarkReviewed));

    migrated.chain(deployed).chain(reviewed).collect()
}

/// Achievements whose tag is missing from the case's current tags.
pub fn find_gaps(
    achievements: Vec<(i64, EditIntent)>,
    tags_by_case: &HashMap<i64, Vec<String>>,
) -> Vec<(i64, EditIntent)> {
    achievements
        .into_iter()
        .filter(|(case_id, intent)| {
            let tags = tags_by_case.get(case_id).map(Vec::as_slice).unwrap_or(&[]);
            !intent.reflected_in(tags)
        })
        .collect()
}

/// Enqueue the missing edits; returns the cases that need a drain.
///
/// The gaps come from a read that may be older than what is queued, so a
/// pending edit for the same target, or its opposite, is left alone.
pub async fn enqueue_gaps<S: OutboxStore>(
    store: &S,
    gaps: Vec<(i64, EditIntent)>,
) -> AppResult<Vec<i64>> {
    let mut touched = BTreeSet::new();
    let mut created = 0usize;
    for (case_id, intent) in gaps {
        if store.enqueue_if_absent(case_id, &intent).await?.is_some() {
            created += 1;
        }
        touched.insert(case_id);
    }
    if !touched.is_empty() {
        info!(
            "Notify sweep created {} edits across {} cases",
            created,
            touched.len()
        );
    }
    Ok(touched.into_iter().collect())
}

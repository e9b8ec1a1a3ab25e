//! Migration report aggregation.
//!
//! Derives the rollout status and consolidated log of a migration on one
//! instance from the step reports recorded for it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::models::{MigrationReportStatus, StepPhase, StepReportStatus};

/// A step of the migration, as needed for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRef {
    pub id: Uuid,
    pub phase: StepPhase,
    pub position: i32,
}

/// The latest recorded outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step_id: Uuid,
    pub status: StepReportStatus,
    pub log: String,
    pub recorded_at: DateTime<Utc>,
}

/// Result of a recompute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub status: MigrationReportStatus,
    pub log: String,
    /// Step reports whose step no longer exists on the migration.
    pub orphaned: Vec<Uuid>,
}

/// Recompute status and log from the migration's steps and current step reports.
///
/// Orphaned step reports are excluded from the status but kept at the end of the
/// log, oldest first.
pub fn recompute(steps: &[StepRef], outcomes: &[StepOutcome]) -> Aggregate {
    let step_ids: HashSet<Uuid> = steps.iter().map(|s| s.id).collect();
    let by_step: HashMap<Uuid, &StepOutcome> = outcomes
        .iter()
        .filter(|o| step_ids.contains(&o.step_id))
        .map(|o| (o.step_id, o))
        .collect();

    let applied = by_step
        .values()
        .filter(|o| o.status == StepReportStatus::Applied)
        .count();
    let failed = by_step.len() - applied;

    let status = if applied == step_ids.len() {
        MigrationReportStatus::Applied
    } else if applied > 0 && failed > 0 {
        MigrationReportStatus::AppliedPartially
    } else {
        MigrationReportStatus::Error
    };

    let mut ordered: Vec<&StepRef> = steps.iter().collect();
    ordered.sort_by_key(|s| (s.phase, s.position));

    let mut blocks: Vec<String> = ordered
        .iter()
        .filter_map(|step| {
            by_step
                .get(&step.id)
                .map(|outcome| render_block(step.id, Some(step.position), &outcome.log))
        })
        .collect();

    let mut orphans: Vec<&StepOutcome> = outcomes
        .iter()
        .filter(|o| !step_ids.contains(&o.step_id))
        .collect();
    orphans.sort_by_key(|o| (o.recorded_at, o.step_id));

    for orphan in &orphans {
        warn!(
            step_id = %orphan.step_id,
            "Step report refers to a step no longer part of the migration"
        );
        blocks.push(render_block(orphan.step_id, None, &orphan.log));
    }

    Aggregate {
        status,
        log: blocks.join("\n\n"),
        orphaned: orphans.iter().map(|o| o.step_id).collect(),
    }
}

fn render_block(step_id: Uuid, position: Option<i32>, log: &str) -> String {
    match position {
        Some(position) => format!("Step {}, position {}:\n{}", step_id, position, log),
        None => format!("Step {} (removed):\n{}", step_id, log),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n: u128, phase: StepPhase, position: i32) -> StepRef {
        StepRef {
            id: Uuid::from_u128(n),
            phase,
            position,
        }
    }

    fn outcome(n: u128, status: StepReportStatus, log: &str) -> StepOutcome {
        StepOutcome {
            step_id: Uuid::from_u128(n),
            status,
            log: log.to_string(),
            recorded_at: Utc::now(),
        }
    }

    fn three_steps() -> Vec<StepRef> {
        vec![
            step(3, StepPhase::PostDeploy, 1),
            step(1, StepPhase::PreDeploy, 1),
            step(2, StepPhase::PreDeploy, 2),
        ]
    }

    #[test]
    fn test_missing_step_report_is_error() {
        let outcomes = vec![
            outcome(1, StepReportStatus::Applied, "ok 1"),
            outcome(3, StepReportStatus::Applied, "ok 3"),
        ];
        let agg = recompute(&three_steps(), &outcomes);
        assert_eq!(agg.status, MigrationReportStatus::Error);
    }

    #[test]
    fn test_failed_step_makes_partial() {
        let outcomes = vec![
            outcome(1, StepReportStatus::Applied, "ok 1"),
            outcome(3, StepReportStatus::Applied, "ok 3"),
            outcome(2, StepReportStatus::Error, "boom"),
        ];
        let agg = recompute(&three_steps(), &outcomes);
        assert_eq!(agg.status, MigrationReportStatus::AppliedPartially);
    }

    #[test]
    fn test_all_applied() {
        let outcomes = vec![
            outcome(2, StepReportStatus::Applied, "b"),
            outcome(1, StepReportStatus::Applied, "a"),
            outcome(3, StepReportStatus::Applied, "c"),
        ];
        let agg = recompute(&three_steps(), &outcomes);
        assert_eq!(agg.status, MigrationReportStatus::Applied);
    }

    #[test]
    fn test_no_reports_is_error() {
        let agg = recompute(&three_steps(), &[]);
        assert_eq!(agg.status, MigrationReportStatus::Error);
        assert!(agg.log.is_empty());
    }

    #[test]
    fn test_all_failed_is_error() {
        let outcomes = vec![
            outcome(1, StepReportStatus::Error, "a"),
            outcome(2, StepReportStatus::Error, "b"),
            outcome(3, StepReportStatus::Error, "c"),
        ];
        assert_eq!(
            recompute(&three_steps(), &outcomes).status,
            MigrationReportStatus::Error
        );
    }

    #[test]
    fn test_log_follows_phase_then_position() {
        let outcomes = vec![
            outcome(3, StepReportStatus::Applied, "third"),
            outcome(2, StepReportStatus::Applied, "second"),
            outcome(1, StepReportStatus::Applied, "first"),
        ];
        let agg = recompute(&three_steps(), &outcomes);
        let first = agg.log.find("first").unwrap();
        let second = agg.log.find("second").unwrap();
        let third = agg.log.find("third").unwrap();
        assert!(first < second && second < third);
        assert_eq!(agg.log.matches("\n\n").count(), 2);
        assert!(agg.log.starts_with(&format!("Step {}, position 1:\nfirst", Uuid::from_u128(1))));
    }

    #[test]
    fn test_orphan_excluded_from_status_but_logged_last() {
        let steps = vec![step(1, StepPhase::PreDeploy, 1)];
        let outcomes = vec![
            outcome(9, StepReportStatus::Error, "stale"),
            outcome(1, StepReportStatus::Applied, "fresh"),
        ];
        let agg = recompute(&steps, &outcomes);
        assert_eq!(agg.status, MigrationReportStatus::Applied);
        assert_eq!(agg.orphaned, vec![Uuid::from_u128(9)]);
        assert!(agg.log.find("fresh").unwrap() < agg.log.find("stale").unwrap());
    }

    #[test]
    fn test_retrying_a_failed_step_never_lowers_status() {
        let steps = three_steps();
        let mut outcomes = vec![
            outcome(1, StepReportStatus::Applied, "a"),
            outcome(2, StepReportStatus::Error, "b"),
            outcome(3, StepReportStatus::Applied, "c"),
        ];
        let before = recompute(&steps, &outcomes).status;
        outcomes[1] = outcome(2, StepReportStatus::Applied, "b again");
        let after = recompute(&steps, &outcomes).status;
        assert_eq!(before, MigrationReportStatus::AppliedPartially);
        assert_eq!(after, MigrationReportStatus::Applied);
    }
}

//! Notify sweep feeding the outbox.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use pdt_lib::models::case::{REVIEWED_TAG, deployed_tag, migration_applied_tag};
use pdt_lib::models::{DeploymentStatus, EditIntent, EditType, MigrationReportStatus};
use pdt_lib::services::handlers::HandlerRegistry;
use pdt_lib::services::notify::{self, DeploymentFact, MigrationFact};
use pdt_lib::services::outbox::{MemoryOutbox, OutboxStore};
use pdt_lib::services::sync_worker::drain;
use uuid::Uuid;

use super::stub_tracker::StubTracker;

fn applied(case_id: i64, instance: &str) -> MigrationFact {
    MigrationFact {
        case_id,
        instance: instance.to_string(),
        report_id: Uuid::now_v7(),
    }
}

fn deployment(case_id: i64, instance: &str, status: DeploymentStatus, age_mins: i64) -> DeploymentFact {
    DeploymentFact {
        case_id,
        instance: instance.to_string(),
        report_id: Uuid::now_v7(),
        status,
        timestamp: Utc::now() - Duration::minutes(age_mins),
    }
}

async fn sweep(
    store: &MemoryOutbox,
    migrations: Vec<MigrationFact>,
    deployments: Vec<DeploymentFact>,
    reviewed: Vec<i64>,
    tags: &HashMap<i64, Vec<String>>,
) -> Vec<i64> {
    let found = notify::achievements(migrations, deployments, reviewed);
    let gaps = notify::find_gaps(found, tags);
    notify::enqueue_gaps(store, gaps).await.unwrap()
}

#[tokio::test]
async fn test_sweep_enqueues_only_missing_tags() {
    let store = MemoryOutbox::new();
    let mut tags = HashMap::new();
    tags.insert(1, vec![migration_applied_tag("prod")]);
    tags.insert(2, vec![REVIEWED_TAG.to_string()]);

    let touched = sweep(
        &store,
        vec![applied(1, "prod"), applied(1, "staging")],
        vec![deployment(2, "prod", DeploymentStatus::Deployed, 5)],
        vec![2],
        &tags,
    )
    .await;

    assert_eq!(touched, vec![1, 2]);

    let case_1 = store.pending_for(1).await.unwrap();
    assert_eq!(case_1.len(), 1);
    assert_eq!(case_1[0].edit_type(), EditType::MigrationReportChanged);
    assert_eq!(case_1[0].intent.target(), Some("staging"));

    let case_2 = store.pending_for(2).await.unwrap();
    assert_eq!(case_2.len(), 1);
    assert_eq!(case_2[0].edit_type(), EditType::DeploymentReportChanged);
}

#[tokio::test]
async fn test_repeated_sweeps_do_not_duplicate_edits() {
    let store = MemoryOutbox::new();
    let tags = HashMap::new();

    for _ in 0..3 {
        sweep(
            &store,
            vec![applied(4, "prod")],
            vec![deployment(4, "prod", DeploymentStatus::Deployed, 1)],
            vec![4],
            &tags,
        )
        .await;
    }

    assert_eq!(store.pending_count(4).await.unwrap(), 3);
}

#[tokio::test]
async fn test_failed_redeploy_is_not_announced() {
    let store = MemoryOutbox::new();

    let touched = sweep(
        &store,
        vec![],
        vec![
            deployment(5, "prod", DeploymentStatus::Deployed, 30),
            deployment(5, "prod", DeploymentStatus::Error, 2),
        ],
        vec![],
        &HashMap::new(),
    )
    .await;

    assert!(touched.is_empty());
    assert_eq!(store.pending_count(5).await.unwrap(), 0);
}

#[tokio::test]
async fn test_swept_edits_drain_and_close_the_gap() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::with_case(8, &[]);
    let handlers = HandlerRegistry::standard("cixmigrationurl");

    let migrations = vec![applied(8, "prod")];
    let deployments = vec![deployment(8, "prod", DeploymentStatus::Deployed, 1)];

    let touched = sweep(
        &store,
        migrations.clone(),
        deployments.clone(),
        vec![8],
        &HashMap::new(),
    )
    .await;
    assert_eq!(touched, vec![8]);
    drain(&store, &tracker, &handlers, 8).await.unwrap();

    let tags = tracker.tags(8);
    assert!(tags.contains(&REVIEWED_TAG.to_string()));
    assert!(tags.contains(&migration_applied_tag("prod")));
    assert!(tags.contains(&deployed_tag("prod")));

    // The stored tags now reflect everything, so the next sweep is quiet.
    let mut local = HashMap::new();
    local.insert(8, store.tags_for(8).unwrap());
    let touched = sweep(&store, migrations, deployments, vec![8], &local).await;
    assert!(touched.is_empty());
}

#[tokio::test]
async fn test_stale_sweep_leaves_newer_edits_alone() {
    let store = MemoryOutbox::new();
    let partial_report = Uuid::now_v7();

    // Queued after the sweep read its facts: the case was unreviewed and the
    // prod report regressed to a partial apply.
    store.enqueue(9, &EditIntent::MarkUnreviewed).await.unwrap();
    store
        .enqueue(
            9,
            &EditIntent::MigrationReportChanged {
                instance: "prod".to_string(),
                report_id: partial_report,
                status: MigrationReportStatus::AppliedPartially,
            },
        )
        .await
        .unwrap();

    let touched = sweep(
        &store,
        vec![applied(9, "prod")],
        vec![],
        vec![9],
        &HashMap::new(),
    )
    .await;
    assert_eq!(touched, vec![9]);

    let pending = store.pending_for(9).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].intent, EditIntent::MarkUnreviewed);
    assert_eq!(
        pending[1].intent,
        EditIntent::MigrationReportChanged {
            instance: "prod".to_string(),
            report_id: partial_report,
            status: MigrationReportStatus::AppliedPartially,
        }
    );

    let tracker = StubTracker::with_case(9, &[REVIEWED_TAG]);
    drain(&store, &tracker, &HandlerRegistry::standard("cixmigrationurl"), 9)
        .await
        .unwrap();
    assert!(!tracker.tags(9).contains(&REVIEWED_TAG.to_string()));
}

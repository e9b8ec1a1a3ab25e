//! Drain protocol: atomicity, contention and idempotent re-runs.

use pdt_lib::models::case::{REVIEWED_TAG, deployed_tag, migration_applied_tag};
use pdt_lib::models::{DeploymentStatus, EditIntent, EditType, MigrationReportStatus};
use pdt_lib::services::events::{self, DomainEvent};
use pdt_lib::services::handlers::{EditHandler, HandlerRegistry};
use pdt_lib::services::outbox::{MemoryOutbox, OutboxStore};
use pdt_lib::services::sync_worker::{DrainError, DrainOutcome, drain};
use pdt_lib::services::tracker::{CaseRecord, FieldUpdates, TrackerError};
use tokio_test::assert_err;
use uuid::Uuid;

use super::stub_tracker::StubTracker;

const CASE: i64 = 10;
const URL_FIELD: &str = "sMigrationUrl";

fn handlers() -> HandlerRegistry {
    HandlerRegistry::standard(URL_FIELD)
}

fn applied(instance: &str) -> EditIntent {
    EditIntent::MigrationReportChanged {
        instance: instance.to_string(),
        report_id: Uuid::now_v7(),
        status: MigrationReportStatus::Applied,
    }
}

fn deployed(instance: &str) -> EditIntent {
    EditIntent::DeploymentReportChanged {
        instance: instance.to_string(),
        report_id: Uuid::now_v7(),
        status: DeploymentStatus::Deployed,
    }
}

async fn enqueue_three(store: &MemoryOutbox) {
    store.enqueue(CASE, &EditIntent::MarkReviewed).await.unwrap();
    store.enqueue(CASE, &applied("prod")).await.unwrap();
    store.enqueue(CASE, &deployed("prod")).await.unwrap();
}

#[tokio::test]
async fn test_drain_applies_every_edit_and_stores_tags() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::with_case(CASE, &["customer"]);
    enqueue_three(&store).await;

    let outcome = drain(&store, &tracker, &handlers(), CASE).await.unwrap();

    assert_eq!(outcome, DrainOutcome::Drained { applied: 3, skipped: 0 });
    assert_eq!(store.pending_count(CASE).await.unwrap(), 0);
    assert_eq!(tracker.searches(), 1, "snapshot is fetched once per drain");

    let tags = tracker.tags(CASE);
    assert!(tags.contains(&REVIEWED_TAG.to_string()));
    assert!(tags.contains(&migration_applied_tag("prod")));
    assert!(tags.contains(&deployed_tag("prod")));
    assert!(tags.contains(&"customer".to_string()));
    assert_eq!(store.tags_for(CASE), Some(tags));
    assert_eq!(
        tracker.events(CASE),
        vec!["Migration Applied on prod".to_string(), "Deployed on prod".to_string()]
    );
}

#[tokio::test]
async fn test_failure_mid_batch_keeps_every_edit_pending() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::with_case(CASE, &[]);
    enqueue_three(&store).await;
    tracker.fail_edit_at(2);

    let err = assert_err!(drain(&store, &tracker, &handlers(), CASE).await);

    assert!(matches!(err, DrainError::Tracker(TrackerError::Transport(_))));
    assert_eq!(store.pending_count(CASE).await.unwrap(), 3);
    assert!(!store.is_locked(CASE));
    assert_eq!(store.tags_for(CASE), None);
}

#[tokio::test]
async fn test_rerun_after_partial_success_skips_reflected_edits() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::with_case(CASE, &[]);
    enqueue_three(&store).await;
    tracker.fail_edit_at(2);
    assert!(drain(&store, &tracker, &handlers(), CASE).await.is_err());
    assert_eq!(tracker.edit_calls(), 2);

    tracker.clear_failures();
    let outcome = drain(&store, &tracker, &handlers(), CASE).await.unwrap();

    assert_eq!(outcome, DrainOutcome::Drained { applied: 2, skipped: 1 });
    assert_eq!(tracker.edit_calls(), 4);
    assert_eq!(store.pending_count(CASE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_rejected_edit_aborts_the_batch() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::with_case(CASE, &[]);
    enqueue_three(&store).await;
    tracker.reject_edit_at(1);

    let err = drain(&store, &tracker, &handlers(), CASE).await.unwrap_err();

    assert!(matches!(err, DrainError::Rejected { case_id: CASE, .. }));
    assert_eq!(store.pending_count(CASE).await.unwrap(), 3);
    assert!(!store.is_locked(CASE));
}

#[tokio::test]
async fn test_locked_case_is_skipped_without_error() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::with_case(CASE, &[]);
    store.enqueue(CASE, &EditIntent::MarkReviewed).await.unwrap();

    let held = store.try_lock(CASE).await.unwrap().unwrap();
    let outcome = drain(&store, &tracker, &handlers(), CASE).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Contended);
    assert_eq!(tracker.searches(), 0);

    drop(held);
    let outcome = drain(&store, &tracker, &handlers(), CASE).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Drained { applied: 1, skipped: 0 });
}

#[tokio::test]
async fn test_empty_outbox_does_not_call_the_tracker() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::with_case(CASE, &[]);

    let outcome = drain(&store, &tracker, &handlers(), CASE).await.unwrap();

    assert_eq!(outcome, DrainOutcome::Empty);
    assert_eq!(tracker.searches(), 0);
    assert!(!store.is_locked(CASE));
}

#[tokio::test]
async fn test_case_missing_in_tracker_keeps_edits() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::default();
    store.enqueue(99, &EditIntent::MarkReviewed).await.unwrap();

    let err = drain(&store, &tracker, &handlers(), 99).await.unwrap_err();

    assert!(matches!(err, DrainError::CaseMissing(99)));
    assert_eq!(store.pending_count(99).await.unwrap(), 1);
}

#[tokio::test]
async fn test_already_reflected_edit_is_deleted_without_a_write() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::with_case(CASE, &[REVIEWED_TAG]);
    store.enqueue(CASE, &EditIntent::MarkReviewed).await.unwrap();

    let outcome = drain(&store, &tracker, &handlers(), CASE).await.unwrap();

    assert_eq!(outcome, DrainOutcome::Drained { applied: 0, skipped: 1 });
    assert_eq!(tracker.edit_calls(), 0);
    assert_eq!(store.pending_count(CASE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unreview_after_review_leaves_tag_off() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::with_case(CASE, &[REVIEWED_TAG]);
    store.enqueue(CASE, &EditIntent::MarkReviewed).await.unwrap();
    store.enqueue(CASE, &EditIntent::MarkUnreviewed).await.unwrap();
    assert_eq!(store.pending_count(CASE).await.unwrap(), 1);

    drain(&store, &tracker, &handlers(), CASE).await.unwrap();

    assert!(!tracker.tags(CASE).contains(&REVIEWED_TAG.to_string()));
}

#[tokio::test]
async fn test_published_migration_link_reaches_the_tracker() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::with_case(CASE, &[]);
    let event = DomainEvent::MigrationCreated {
        case_id: CASE,
        uid: "add-orders-index".to_string(),
    };

    let touched = events::publish(&store, "https://pdt.example.com", &[event.clone()])
        .await
        .unwrap();
    assert_eq!(touched, vec![CASE]);
    drain(&store, &tracker, &handlers(), CASE).await.unwrap();

    assert_eq!(
        tracker.field(CASE, URL_FIELD).as_deref(),
        Some("https://pdt.example.com/migrations/add-orders-index")
    );

    // Publishing the same event again drains to a no-op.
    events::publish(&store, "https://pdt.example.com", &[event])
        .await
        .unwrap();
    let outcome = drain(&store, &tracker, &handlers(), CASE).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Drained { applied: 0, skipped: 1 });
}

struct NothingToWrite;

impl EditHandler for NothingToWrite {
    fn plan(&self, _case_id: i64, _snapshot: &CaseRecord, _intent: &EditIntent) -> Option<FieldUpdates> {
        Some(FieldUpdates::default())
    }
}

#[tokio::test]
async fn test_empty_plan_counts_as_reflected() {
    let store = MemoryOutbox::new();
    let tracker = StubTracker::with_case(CASE, &[]);
    let mut registry = HandlerRegistry::empty();
    registry.register(EditType::MarkReviewed, Box::new(NothingToWrite));
    store.enqueue(CASE, &EditIntent::MarkReviewed).await.unwrap();

    let outcome = drain(&store, &tracker, &registry, CASE).await.unwrap();

    assert_eq!(outcome, DrainOutcome::Drained { applied: 0, skipped: 1 });
    assert_eq!(tracker.edit_calls(), 0);
    assert_eq!(store.pending_count(CASE).await.unwrap(), 0);
}

//! Drains scheduled through the task dispatcher.

use std::sync::Arc;
use std::time::Duration;

use pdt_lib::models::DeploymentStatus;
use pdt_lib::models::case::deployed_tag;
use pdt_lib::services::dispatcher::{Submission, TaskDispatcher};
use pdt_lib::services::events::{self, DomainEvent};
use pdt_lib::services::handlers::HandlerRegistry;
use pdt_lib::services::outbox::{MemoryOutbox, OutboxStore};
use pdt_lib::services::scheduler::DRAIN_TASK;
use pdt_lib::services::sync_worker::drain;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::stub_tracker::StubTracker;

#[derive(Clone)]
struct Harness {
    store: MemoryOutbox,
    tracker: Arc<StubTracker>,
    handlers: Arc<HandlerRegistry>,
    dispatcher: TaskDispatcher,
}

impl Harness {
    fn new(tracker: StubTracker, concurrency: usize) -> Self {
        Self {
            store: MemoryOutbox::new(),
            tracker: Arc::new(tracker),
            handlers: Arc::new(HandlerRegistry::standard("cixmigrationurl")),
            dispatcher: TaskDispatcher::with_backoff(
                concurrency,
                Duration::from_secs(60),
                Duration::from_secs(600),
            ),
        }
    }

    fn submit_drain(&self, case_id: i64) -> Submission {
        let h = self.clone();
        self.dispatcher.submit(DRAIN_TASK, case_id, move || async move {
            drain(&h.store, h.tracker.as_ref(), &h.handlers, case_id)
                .await
                .map(|_| ())
        })
    }
}

async fn finish(submission: Submission) {
    if let Submission::Queued(handle) = submission {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_duplicate_drain_submissions_collapse() {
    let h = Harness::new(StubTracker::with_case(1, &[]), 1);
    h.store
        .enqueue(1, &pdt_lib::models::EditIntent::MarkReviewed)
        .await
        .unwrap();

    // Occupy the only worker so both submissions wait in the queue.
    let (release, hold) = oneshot::channel::<()>();
    let blocker = h.dispatcher.submit("blocker", "", move || async move {
        let _ = hold.await;
        Ok::<(), String>(())
    });

    let first = h.submit_drain(1);
    let second = h.submit_drain(1);
    assert!(first.is_queued());
    assert!(matches!(second, Submission::Duplicate));

    release.send(()).unwrap();
    finish(blocker).await;
    finish(first).await;

    assert_eq!(h.tracker.searches(), 1);
    assert_eq!(h.store.pending_count(1).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_drain_backs_off_its_case_only() {
    let h = Harness::new(StubTracker::with_case(2, &[]), 2);
    h.store
        .enqueue(5, &pdt_lib::models::EditIntent::MarkReviewed)
        .await
        .unwrap();

    finish(h.submit_drain(5)).await;

    assert_eq!(h.dispatcher.failures(DRAIN_TASK, 5), 1);
    assert!(matches!(h.submit_drain(5), Submission::BackingOff(_)));
    assert_eq!(h.store.pending_count(5).await.unwrap(), 1);
    assert!(h.submit_drain(2).is_queued());
}

#[tokio::test]
async fn test_deployment_event_drains_every_covered_case() {
    let tracker = StubTracker::default();
    for id in [11, 12, 13] {
        tracker.insert(id, &[]);
    }
    let h = Harness::new(tracker, 4);

    let event = DomainEvent::DeploymentReportLogged {
        case_ids: vec![13, 11, 12],
        instance: "prod".to_string(),
        report_id: Uuid::now_v7(),
        status: DeploymentStatus::Deployed,
    };
    let touched = events::publish(&h.store, "https://pdt", &[event])
        .await
        .unwrap();
    assert_eq!(touched, vec![11, 12, 13]);

    let submissions: Vec<Submission> = touched.iter().map(|id| h.submit_drain(*id)).collect();
    for submission in submissions {
        finish(submission).await;
    }

    for id in touched {
        assert!(h.tracker.tags(id).contains(&deployed_tag("prod")));
        assert_eq!(h.store.pending_count(id).await.unwrap(), 0);
    }
}

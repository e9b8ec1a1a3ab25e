//! FogBugz client against the mock JSON API.

use pdt_lib::config::TrackerSettings;
use pdt_lib::services::handlers::HandlerRegistry;
use pdt_lib::services::outbox::{MemoryOutbox, OutboxStore};
use pdt_lib::services::sync_worker::{DrainError, DrainOutcome, drain};
use pdt_lib::services::tracker::{CaseTracker, FieldUpdates, FogBugzClient, TrackerError};
use pdt_lib::models::EditIntent;
use secrecy::SecretString;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use super::mock_tracker_server::MockTrackerServer;

const URL_FIELD: &str = "cixmigrationurl";

fn client(server: &MockTrackerServer) -> FogBugzClient {
    let settings = TrackerSettings {
        url: server.url.clone(),
        token: SecretString::from("fb-token".to_string()),
        ci_project_field: "cixproject".to_string(),
        migration_url_field: URL_FIELD.to_string(),
        revision_field: "cixrevision".to_string(),
    };
    FogBugzClient::new(&settings).unwrap()
}

#[actix_rt::test]
async fn test_fetch_case_sends_token_and_custom_columns() {
    let server = MockTrackerServer::start().await;
    server.add_case(42, "2026.10", &["migration-reviewed"]);
    server.set_field(42, "cixproject", "billing");
    let client = client(&server);

    let record = assert_ok!(client.fetch_case(42).await).unwrap();

    assert_eq!(record.id, 42);
    assert_eq!(record.milestone.as_deref(), Some("2026.10"));
    assert_eq!(record.tags, vec!["migration-reviewed".to_string()]);
    assert_eq!(record.custom_field("cixproject"), Some("billing"));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["cmd"], "search");
    assert_eq!(requests[0]["token"], "fb-token");
    assert_eq!(requests[0]["q"], "ixBug:42");
    let cols = requests[0]["cols"].as_array().unwrap();
    assert!(cols.contains(&json!("tags")));
    assert!(cols.contains(&json!(URL_FIELD)));
}

#[actix_rt::test]
async fn test_fetch_unknown_case_is_none() {
    let server = MockTrackerServer::start().await;
    server.add_case(1, "2026.10", &[]);

    assert!(client(&server).fetch_case(2).await.unwrap().is_none());
}

#[actix_rt::test]
async fn test_edit_sends_tags_event_and_custom_fields() {
    let server = MockTrackerServer::start().await;
    server.add_case(7, "2026.10", &["customer"]);
    let client = client(&server);

    let mut updates = FieldUpdates {
        tags: Some(vec!["customer".to_string(), "deployed-prod".to_string()]),
        event: Some("Deployed on prod".to_string()),
        ..Default::default()
    };
    updates
        .custom
        .insert(URL_FIELD.to_string(), "https://pdt/migrations/m-1".to_string());

    let response = client.edit(7, &updates).await.unwrap();
    let record = response.case.unwrap();

    assert_eq!(
        record.tags,
        vec!["customer".to_string(), "deployed-prod".to_string()]
    );
    assert_eq!(record.custom_field(URL_FIELD), Some("https://pdt/migrations/m-1"));

    let request = server.requests().pop().unwrap();
    assert_eq!(request["cmd"], "edit");
    assert_eq!(request["ixBug"], 7);
    assert_eq!(request["sTags"], "customer,deployed-prod");
    assert_eq!(request["sEvent"], "Deployed on prod");
}

#[actix_rt::test]
async fn test_api_errors_are_reported() {
    let server = MockTrackerServer::start().await;
    server.add_case(7, "2026.10", &[]);
    server.fail_next("Case 7 is closed");

    let err = assert_err!(client(&server).edit(7, &FieldUpdates::default()).await);

    match err {
        TrackerError::Api(message) => assert_eq!(message, "Case 7 is closed"),
        other => panic!("expected api error, got {:?}", other),
    }
}

#[actix_rt::test]
async fn test_refused_edit_returns_no_case() {
    let server = MockTrackerServer::start().await;
    server.add_case(7, "2026.10", &[]);
    server.refuse_edits(true);

    let response = client(&server)
        .edit(7, &FieldUpdates::default())
        .await
        .unwrap();

    assert!(response.case.is_none());
}

#[actix_rt::test]
async fn test_server_error_is_a_transport_failure() {
    let server = MockTrackerServer::start().await;
    server.set_unavailable(true);

    let err = assert_err!(client(&server).fetch_case(1).await);

    assert!(matches!(err, TrackerError::Transport(_)));
}

#[actix_rt::test]
async fn test_drain_through_http_client() {
    let server = MockTrackerServer::start().await;
    server.add_case(42, "2026.10", &[]);
    let client = client(&server);
    let handlers = HandlerRegistry::standard(URL_FIELD);
    let store = MemoryOutbox::new();

    store.enqueue(42, &EditIntent::MarkReviewed).await.unwrap();
    store
        .enqueue(
            42,
            &EditIntent::LinkMigration {
                migration_uid: "m-1".to_string(),
                url: "https://pdt/migrations/m-1".to_string(),
            },
        )
        .await
        .unwrap();

    let outcome = drain(&store, &client, &handlers, 42).await.unwrap();

    assert_eq!(outcome, DrainOutcome::Drained { applied: 2, skipped: 0 });
    let case = server.case(42);
    assert_eq!(case["tags"], json!(["migration-reviewed"]));
    assert_eq!(case[URL_FIELD], "https://pdt/migrations/m-1");
    assert_eq!(
        store.tags_for(42),
        Some(vec!["migration-reviewed".to_string()])
    );
}

#[actix_rt::test]
async fn test_drain_keeps_edits_when_tracker_is_down() {
    let server = MockTrackerServer::start().await;
    server.add_case(42, "2026.10", &[]);
    server.set_unavailable(true);
    let client = client(&server);
    let store = MemoryOutbox::new();
    store.enqueue(42, &EditIntent::MarkReviewed).await.unwrap();

    let err = drain(&store, &client, &HandlerRegistry::standard(URL_FIELD), 42)
        .await
        .unwrap_err();

    assert!(matches!(err, DrainError::Tracker(TrackerError::Transport(_))));
    assert_eq!(store.pending_count(42).await.unwrap(), 1);
}

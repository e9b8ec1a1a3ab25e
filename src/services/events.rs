//! Domain events returned by write paths and their outbox mapping.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{DeploymentStatus, EditIntent, MigrationReportStatus};
use crate::services::outbox::OutboxStore;

/// Something happened locally that the tracker should learn about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    MigrationCreated {
        case_id: i64,
        uid: String,
    },
    MigrationReviewChanged {
        case_id: i64,
        reviewed: bool,
    },
    /// The derived status of a migration report changed.
    MigrationReportChanged {
        case_id: i64,
        instance: String,
        report_id: Uuid,
        status: MigrationReportStatus,
    },
    DeploymentReportLogged {
        case_ids: Vec<i64>,
        instance: String,
        report_id: Uuid,
        status: DeploymentStatus,
    },
}

/// Public page of a migration.
pub fn migration_url(public_url: &str, uid: &str) -> String {
    format!("{}/migrations/{}", public_url, urlencoding::encode(uid))
}

impl DomainEvent {
    /// Outbox entries this event calls for.
    pub fn edits(&self, public_url: &str) -> Vec<(i64, EditIntent)> {
        match self {
            Self::MigrationCreated { case_id, uid } => vec![(
                *case_id,
                EditIntent::LinkMigration {
                    migration_uid: uid.clone(),
                    url: migration_url(public_url, uid),
                },
            )],
            Self::MigrationReviewChanged { case_id, reviewed } => {
                let intent = if *reviewed {
                    EditIntent::MarkReviewed
                } else {
                    EditIntent::MarkUnreviewed
                };
                vec![(*case_id, intent)]
            }
            Self::MigrationReportChanged {
                case_id,
                instance,
                report_id,
                status,
            } => vec![(
                *case_id,
                EditIntent::MigrationReportChanged {
                    instance: instance.clone(),
                    report_id: *report_id,
                    status: *status,
                },
            )],
            Self::DeploymentReportLogged {
                case_ids,
                instance,
                report_id,
                status,
            } => case_ids
                .iter()
                .map(|case_id| {
                    (
                        *case_id,
                        EditIntent::DeploymentReportChanged {
                            instance: instance.clone(),
                            report_id: *report_id,
                            status: *status,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Enqueue the edits for `events`; returns the cases that need a drain.
pub async fn publish<S: OutboxStore>(
    store: &S,
    public_url: &str,
    events: &[DomainEvent],
) -> AppResult<Vec<i64>> {
    let mut touched = BTreeSet::new();
    for event in events {
        for (case_id, intent) in event.edits(public_url) {
            store.enqueue(case_id, &intent).await?;
            touched.insert(case_id);
        }
    }
    Ok(touched.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::outbox::MemoryOutbox;

    #[test]
    fn test_migration_url_is_encoded() {
        assert_eq!(
            migration_url("https://pdt.example.com", "add index/v2"),
            "https://pdt.example.com/migrations/add%20index%2Fv2"
        );
    }

    #[test]
    fn test_deployment_event_fans_out_per_case() {
        let event = DomainEvent::DeploymentReportLogged {
            case_ids: vec![3, 1],
            instance: "prod".to_string(),
            report_id: Uuid::nil(),
            status: DeploymentStatus::Deployed,
        };
        let edits = event.edits("http://pdt");
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].0, 3);
    }

    #[tokio::test]
    async fn test_publish_collapses_repeated_events() {
        let outbox = MemoryOutbox::new();
        let events = vec![
            DomainEvent::MigrationReviewChanged {
                case_id: 9,
                reviewed: true,
            },
            DomainEvent::MigrationReviewChanged {
                case_id: 9,
                reviewed: true,
            },
        ];
        let touched = publish(&outbox, "http://pdt", &events).await.unwrap();
        assert_eq!(touched, vec![9]);
        assert_eq!(outbox.pending_count(9).await.unwrap(), 1);
    }
}

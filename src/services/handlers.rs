//! Typed edit handlers.
//!
//! A handler compares an outbox intent with the current tracker snapshot and
//! plans at most one write. Planning from the snapshot makes a re-run after a
//! partially applied drain a no-op for edits the tracker already reflects.

use std::collections::HashMap;

use crate::models::case::{REVIEWED_TAG, deployed_tag, has_tag, migration_applied_tag, with_tag};
use crate::models::{DeploymentStatus, EditIntent, EditType, MigrationReportStatus};
use crate::services::tracker::{CaseRecord, FieldUpdates};

/// Plans the tracker write for one kind of intent.
pub trait EditHandler: Send + Sync {
    /// Field updates to send, or `None` when the snapshot already reflects the intent.
    fn plan(&self, case_id: i64, snapshot: &CaseRecord, intent: &EditIntent) -> Option<FieldUpdates>;
}

fn set_tag(snapshot: &CaseRecord, tag: &str, present: bool) -> Option<Vec<String>> {
    if has_tag(&snapshot.tags, tag) == present {
        None
    } else {
        Some(with_tag(&snapshot.tags, tag, present))
    }
}

/// Writes the public migration URL into the tracker's custom field.
pub struct LinkMigrationHandler {
    pub field: String,
}

impl EditHandler for LinkMigrationHandler {
    fn plan(&self, _case_id: i64, snapshot: &CaseRecord, intent: &EditIntent) -> Option<FieldUpdates> {
        let EditIntent::LinkMigration { url, .. } = intent else {
            return None;
        };
        if snapshot.custom_field(&self.field) == Some(url.as_str()) {
            return None;
        }
        let mut updates = FieldUpdates::default();
        updates.custom.insert(self.field.clone(), url.clone());
        Some(updates)
    }
}

/// Adds or removes the reviewed tag.
pub struct ReviewHandler;

impl EditHandler for ReviewHandler {
    fn plan(&self, _case_id: i64, snapshot: &CaseRecord, intent: &EditIntent) -> Option<FieldUpdates> {
        let reviewed = match intent {
            EditIntent::MarkReviewed => true,
            EditIntent::MarkUnreviewed => false,
            _ => return None,
        };
        set_tag(snapshot, REVIEWED_TAG, reviewed).map(|tags| FieldUpdates {
            tags: Some(tags),
            ..Default::default()
        })
    }
}

/// Keeps `migration-applied-{instance}` in line with the report status.
pub struct MigrationReportHandler;

impl EditHandler for MigrationReportHandler {
    fn plan(&self, _case_id: i64, snapshot: &CaseRecord, intent: &EditIntent) -> Option<FieldUpdates> {
        let EditIntent::MigrationReportChanged {
            instance, status, ..
        } = intent
        else {
            return None;
        };
        let applied = *status == MigrationReportStatus::Applied;
        set_tag(snapshot, &migration_applied_tag(instance), applied).map(|tags| FieldUpdates {
            tags: Some(tags),
            event: Some(format!("Migration {} on {}", status.label(), instance)),
            ..Default::default()
        })
    }
}

/// Tags a case as deployed on an instance. Failed deployments change nothing.
pub struct DeploymentReportHandler;

impl EditHandler for DeploymentReportHandler {
    fn plan(&self, _case_id: i64, snapshot: &CaseRecord, intent: &EditIntent) -> Option<FieldUpdates> {
        let EditIntent::DeploymentReportChanged {
            instance,
            status: DeploymentStatus::Deployed,
            ..
        } = intent
        else {
            return None;
        };
        set_tag(snapshot, &deployed_tag(instance), true).map(|tags| FieldUpdates {
            tags: Some(tags),
            event: Some(format!("Deployed on {}", instance)),
            ..Default::default()
        })
    }
}

/// Handler lookup by edit type.
pub struct HandlerRegistry {
    handlers: HashMap<EditType, Box<dyn EditHandler>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with a handler for every edit type.
    pub fn standard(migration_url_field: &str) -> Self {
        let mut registry = Self::empty();
        registry.register(
            EditType::LinkMigration,
            Box::new(LinkMigrationHandler {
                field: migration_url_field.to_string(),
            }),
        );
        registry.register(EditType::MarkReviewed, Box::new(ReviewHandler));
        registry.register(EditType::MarkUnreviewed, Box::new(ReviewHandler));
        registry.register(EditType::MigrationReportChanged, Box::new(MigrationReportHandler));
        registry.register(EditType::DeploymentReportChanged, Box::new(DeploymentReportHandler));
        registry
    }

    pub fn register(&mut self, edit_type: EditType, handler: Box<dyn EditHandler>) {
        self.handlers.insert(edit_type, handler);
    }

    pub fn get(&self, edit_type: EditType) -> Option<&dyn EditHandler> {
        self.handlers.get(&edit_type).map(|h| h.as_ref())
    }
}

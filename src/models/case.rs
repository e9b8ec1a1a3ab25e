//! Tracker case models and tag conventions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Tag set on a case once its migration has been reviewed.
pub const REVIEWED_TAG: &str = "migration-reviewed";

/// Tag marking a migration as applied on an instance.
pub fn migration_applied_tag(instance: &str) -> String {
    format!("migration-applied-{}", instance)
}

/// Tag marking a case as deployed on an instance.
pub fn deployed_tag(instance: &str) -> String {
    format!("deployed-{}", instance)
}

/// Check tag presence, ignoring case like the tracker does.
pub fn has_tag(tags: &[String], tag: &str) -> bool {
    tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

/// Return `tags` with `tag` added or removed, preserving the original order.
pub fn with_tag(tags: &[String], tag: &str, present: bool) -> Vec<String> {
    let mut result: Vec<String> = tags
        .iter()
        .filter(|t| !t.eq_ignore_ascii_case(tag))
        .cloned()
        .collect();
    if present {
        result.push(tag.to_string());
    }
    result
}

/// Case as exposed by the API.
#[derive(Debug, Clone, Serialize)]
pub struct CaseView {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub tracker_project: Option<String>,
    pub area: Option<String>,
    pub project_id: Option<Uuid>,
    pub release_id: Uuid,
    pub modified_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub revision: Option<String>,
}

/// Case fields taken from the tracker on import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedCase {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub tracker_project: Option<String>,
    pub area: Option<String>,
    pub release: String,
    pub release_date: Option<NaiveDate>,
    /// CI project group, from the tracker's custom field.
    pub ci_project: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub revision: Option<String>,
}

/// Pending outbox size and background sync state for a case.
#[derive(Debug, Clone, Serialize)]
pub struct PendingEditCount {
    pub case_id: i64,
    pub pending: u64,
    /// A background drain is queued or running.
    pub syncing: bool,
    /// Consecutive failed drains; non-zero means the case is backing off.
    pub failed_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_with_tag_adds_once() {
        let current = tags(&["a", "Deployed-prod"]);
        let updated = with_tag(&current, &deployed_tag("prod"), true);
        assert_eq!(updated, tags(&["a", "deployed-prod"]));
    }

    #[test]
    fn test_with_tag_removes() {
        let current = tags(&[REVIEWED_TAG, "b"]);
        assert_eq!(with_tag(&current, REVIEWED_TAG, false), tags(&["b"]));
    }

    #[test]
    fn test_has_tag_case_insensitive() {
        let current = tags(&["Migration-Applied-staging"]);
        assert!(has_tag(&current, &migration_applied_tag("staging")));
        assert!(!has_tag(&current, &migration_applied_tag("prod")));
    }
}

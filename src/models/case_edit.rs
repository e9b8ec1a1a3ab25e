//! Outbox entry models: typed intents of pending tracker edits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::case::{REVIEWED_TAG, deployed_tag, has_tag, migration_applied_tag};
use super::report::{DeploymentStatus, MigrationReportStatus};

/// Closed set of edit kinds the sync worker knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EditType {
    LinkMigration,
    MarkReviewed,
    MarkUnreviewed,
    MigrationReportChanged,
    DeploymentReportChanged,
}

impl EditType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinkMigration => "link-migration",
            Self::MarkReviewed => "mark-reviewed",
            Self::MarkUnreviewed => "mark-unreviewed",
            Self::MigrationReportChanged => "migration-report-changed",
            Self::DeploymentReportChanged => "deployment-report-changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "link-migration" => Some(Self::LinkMigration),
            "mark-reviewed" => Some(Self::MarkReviewed),
            "mark-unreviewed" => Some(Self::MarkUnreviewed),
            "migration-report-changed" => Some(Self::MigrationReportChanged),
            "deployment-report-changed" => Some(Self::DeploymentReportChanged),
            _ => None,
        }
    }

    /// Edit type whose pending entry this one cancels out.
    pub fn superseded(&self) -> Option<EditType> {
        match self {
            Self::MarkReviewed => Some(Self::MarkUnreviewed),
            Self::MarkUnreviewed => Some(Self::MarkReviewed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EditType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed parameters of a pending edit.
///
/// Stored as the `params` JSON column; the `type` tag mirrors `edit_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EditIntent {
    LinkMigration {
        migration_uid: String,
        url: String,
    },
    MarkReviewed,
    MarkUnreviewed,
    MigrationReportChanged {
        instance: String,
        report_id: Uuid,
        status: MigrationReportStatus,
    },
    DeploymentReportChanged {
        instance: String,
        report_id: Uuid,
        status: DeploymentStatus,
    },
}

impl EditIntent {
    pub fn edit_type(&self) -> EditType {
        match self {
            Self::LinkMigration { .. } => EditType::LinkMigration,
            Self::MarkReviewed => EditType::MarkReviewed,
            Self::MarkUnreviewed => EditType::MarkUnreviewed,
            Self::MigrationReportChanged { .. } => EditType::MigrationReportChanged,
            Self::DeploymentReportChanged { .. } => EditType::DeploymentReportChanged,
        }
    }

    /// Instance the edit targets, for intents that exist once per instance.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::MigrationReportChanged { instance, .. }
            | Self::DeploymentReportChanged { instance, .. } => Some(instance),
            _ => None,
        }
    }

    /// Deduplication digest: empty for single-instance intents, otherwise
    /// the hex SHA-256 of the target instance name.
    pub fn target_digest(&self) -> String {
        match self.target() {
            Some(target) => {
                let mut hasher = Sha256::new();
                hasher.update(target.as_bytes());
                hex::encode(hasher.finalize())
            }
            None => String::new(),
        }
    }

    /// Whether the tag set already reflects this intent's terminal state.
    ///
    /// Only terminal states (applied, deployed) are ever reported as reflected.
    pub fn reflected_in(&self, tags: &[String]) -> bool {
        match self {
            Self::MigrationReportChanged {
                instance,
                status: MigrationReportStatus::Applied,
                ..
            } => has_tag(tags, &migration_applied_tag(instance)),
            Self::DeploymentReportChanged {
                instance,
                status: DeploymentStatus::Deployed,
                ..
            } => has_tag(tags, &deployed_tag(instance)),
            Self::MarkReviewed => has_tag(tags, REVIEWED_TAG),
            _ => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Serializing a plain enum of strings and uuids cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

/// A pending outbox entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseEdit {
    /// UUIDv7, so ordering by id is creation order.
    pub id: Uuid,
    pub case_id: i64,
    pub intent: EditIntent,
    pub created_at: DateTime<Utc>,
}

impl CaseEdit {
    pub fn edit_type(&self) -> EditType {
        self.intent.edit_type()
    }
}

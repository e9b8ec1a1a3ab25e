//! Migration and deployment report models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived rollout status of a migration on one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationReportStatus {
    /// Every step of the migration reported applied.
    Applied,
    /// Some steps applied, some failed.
    AppliedPartially,
    /// No usable evidence of success.
    Error,
}

impl MigrationReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AppliedPartially => "applied_partially",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "applied" => Some(Self::Applied),
            "applied_partially" => Some(Self::AppliedPartially),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Human-readable label for tracker comments.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "Applied",
            Self::AppliedPartially => "Applied partially",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for MigrationReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single migration step on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepReportStatus {
    Applied,
    Error,
}

impl StepReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Error => "error",
        }
    }

    /// Unknown values are treated as failures so they never count as applied.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "applied" => Self::Applied,
            _ => Self::Error,
        }
    }
}

/// Outcome of a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Deployed,
    Error,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deployed" => Some(Self::Deployed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request to record the outcome of one migration step on an instance.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordStepReportRequest {
    pub migration_uid: String,
    pub instance: String,
    pub step_id: Uuid,
    pub status: StepReportStatus,
    #[serde(default)]
    pub log: String,
}

/// Request to record a deployment run.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordDeploymentRequest {
    pub instance: String,
    #[serde(default)]
    pub release: Option<String>,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub log: String,
    /// Tracker case ids covered by the deployment.
    #[serde(default)]
    pub cases: Vec<i64>,
}

/// Migration report as exposed by the status query interface.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReportView {
    pub id: Uuid,
    pub migration_id: Uuid,
    pub instance_id: Uuid,
    pub status: MigrationReportStatus,
    pub log: String,
    pub timestamp: DateTime<Utc>,
}

/// Response after recording a step report.
#[derive(Debug, Clone, Serialize)]
pub struct StepReportResponse {
    pub step_report_id: Uuid,
    pub report: MigrationReportView,
    /// True when the derived report status changed with this write.
    pub status_changed: bool,
}

/// Deployment report as exposed by the API.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReportView {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub release_id: Option<Uuid>,
    pub status: DeploymentStatus,
    pub log: String,
    pub cases: Vec<i64>,
    pub timestamp: DateTime<Utc>,
}

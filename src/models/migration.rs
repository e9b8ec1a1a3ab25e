//! Migration domain models and DTOs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::report::MigrationReportStatus;

/// Deployment phase a migration step runs in.
///
/// Phases execute in declaration order; `Ord` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    /// Runs before the new code is deployed.
    PreDeploy,
    /// Runs after the new code is deployed.
    PostDeploy,
    /// Runs last, once the deployment is confirmed.
    Final,
}

impl StepPhase {
    pub const ALL: [StepPhase; 3] = [Self::PreDeploy, Self::PostDeploy, Self::Final];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreDeploy => "pre_deploy",
            Self::PostDeploy => "post_deploy",
            Self::Final => "final",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pre_deploy" => Some(Self::PreDeploy),
            "post_deploy" => Some(Self::PostDeploy),
            "final" => Some(Self::Final),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Script kind of a migration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Mysql,
    Pgsql,
    Python,
    Sh,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Pgsql => "pgsql",
            Self::Python => "python",
            Self::Sh => "sh",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mysql" => Some(Self::Mysql),
            "pgsql" => Some(Self::Pgsql),
            "python" => Some(Self::Python),
            "sh" => Some(Self::Sh),
            _ => None,
        }
    }
}

/// Whether a migration can run while the service stays online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationCategory {
    #[default]
    Online,
    Offline,
}

impl MigrationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Step payload in a create/update migration request.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationStepInput {
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub code: String,
    #[serde(default)]
    pub path: Option<String>,
    pub position: i32,
}

/// Request to create or update a migration with all of its steps.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertMigrationRequest {
    pub uid: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// External tracker case id the migration belongs to.
    pub case_id: i64,
    #[serde(default)]
    pub category: MigrationCategory,
    #[serde(default)]
    pub pre_deploy_steps: Vec<MigrationStepInput>,
    #[serde(default)]
    pub post_deploy_steps: Vec<MigrationStepInput>,
    #[serde(default)]
    pub final_steps: Vec<MigrationStepInput>,
}

impl UpsertMigrationRequest {
    /// All steps tagged with their phase.
    pub fn steps(&self) -> impl Iterator<Item = (StepPhase, &MigrationStepInput)> {
        self.pre_deploy_steps
            .iter()
            .map(|s| (StepPhase::PreDeploy, s))
            .chain(self.post_deploy_steps.iter().map(|s| (StepPhase::PostDeploy, s)))
            .chain(self.final_steps.iter().map(|s| (StepPhase::Final, s)))
    }

    /// Check uid, parent and step position uniqueness per phase.
    pub fn validate(&self) -> Result<(), String> {
        if self.uid.trim().is_empty() {
            return Err("uid must not be empty".to_string());
        }
        if self.parent.as_deref() == Some(self.uid.as_str()) {
            return Err("a migration cannot be its own parent".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for (phase, step) in self.steps() {
            if !seen.insert((phase, step.position)) {
                return Err(format!(
                    "duplicate position {} in {} steps",
                    step.position, phase
                ));
            }
        }
        Ok(())
    }
}

/// Request to flip the reviewed flag of several migrations.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewMigrationsRequest {
    pub uids: Vec<String>,
    pub reviewed: bool,
}

/// Request to stamp migrations as applied on an instance.
#[derive(Debug, Clone, Deserialize)]
pub struct StampMigrationsRequest {
    pub uids: Vec<String>,
    pub instance: String,
    #[serde(default)]
    pub log: String,
}

/// Filters for the sorted migration listing.
///
/// `instance` scopes `status` and `exclude_status`. A migration without a
/// report on the instance matches `exclude_status` but never `status`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MigrationFilter {
    pub reviewed: Option<bool>,
    pub category: Option<MigrationCategory>,
    pub release: Option<String>,
    pub instance: Option<String>,
    pub status: Option<MigrationReportStatus>,
    pub exclude_status: Option<MigrationReportStatus>,
}

impl MigrationFilter {
    pub fn validate(&self) -> Result<(), String> {
        if (self.status.is_some() || self.exclude_status.is_some()) && self.instance.is_none() {
            return Err("status filters require an instance".to_string());
        }
        Ok(())
    }

    /// Apply the report status filters given the report status on the instance, if any.
    pub fn matches_report(&self, report_status: Option<MigrationReportStatus>) -> bool {
        if let Some(wanted) = self.status
            && report_status != Some(wanted)
        {
            return false;
        }
        if let Some(excluded) = self.exclude_status
            && report_status == Some(excluded)
        {
            return false;
        }
        true
    }
}

/// Migration step as exposed by the API.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStepView {
    pub id: Uuid,
    pub phase: StepPhase,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub position: i32,
    pub code: String,
    pub path: Option<String>,
}

/// Migration as exposed by the API.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationView {
    pub id: Uuid,
    pub uid: String,
    pub parent: Option<String>,
    pub case_id: i64,
    pub category: MigrationCategory,
    pub reviewed: bool,
    pub steps: Vec<MigrationStepView>,
}

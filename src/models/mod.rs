//! Domain models for the deployment tracking server.

pub mod case;
pub mod case_edit;
pub mod migration;
pub mod report;

// Re-export commonly used types
pub use case::{CaseView, ImportedCase, PendingEditCount};
pub use case_edit::{CaseEdit, EditIntent, EditType};
pub use migration::{
    MigrationCategory, MigrationFilter, MigrationStepInput, MigrationStepView, MigrationView,
    ReviewMigrationsRequest, StampMigrationsRequest, StepPhase, StepType, UpsertMigrationRequest,
};
pub use report::{
    DeploymentReportView, DeploymentStatus, MigrationReportStatus, MigrationReportView,
    RecordDeploymentRequest, RecordStepReportRequest, StepReportResponse, StepReportStatus,
};

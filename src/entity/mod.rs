//! SeaORM entity definitions for PostgreSQL database.

pub mod case;
pub mod case_edit;
pub mod deployment_report;
pub mod deployment_report_case;
pub mod instance;
pub mod migration;
pub mod migration_report;
pub mod migration_step;
pub mod migration_step_report;
pub mod project;
pub mod release;

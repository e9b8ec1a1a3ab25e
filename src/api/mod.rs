//! API endpoint modules.

pub mod cases;
pub mod health;
pub mod migrations;
pub mod reports;

pub use cases::configure_routes as configure_case_routes;
pub use health::configure_health_routes;
pub use migrations::configure_routes as configure_migration_routes;
pub use reports::configure_routes as configure_report_routes;

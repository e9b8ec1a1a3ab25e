//! Business logic services.

pub mod aggregator;
pub mod dispatcher;
pub mod events;
pub mod handlers;
pub mod import;
pub mod migrations;
pub mod notify;
pub mod orderer;
pub mod outbox;
pub mod reports;
pub mod scheduler;
pub mod sync_worker;
pub mod tracker;

pub use dispatcher::{Submission, TaskDispatcher};
pub use scheduler::{start_scheduler, SyncContext};

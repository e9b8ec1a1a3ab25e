//! Reconciliation scheduler.
//!
//! Three periodic duties keep the tracker in step with local state:
//! importing cases, pushing pending outbox edits, and sweeping for terminal
//! states the tracker does not show yet. Every duty and every per-case task
//! goes through the [`TaskDispatcher`], so overlapping ticks collapse.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::config::SchedulerSettings;
use crate::db::{DbPool, PgOutbox};
use crate::error::AppResult;
use crate::services::dispatcher::{Submission, TaskDispatcher};
use crate::services::events::{self, DomainEvent};
use crate::services::handlers::HandlerRegistry;
use crate::services::import::{self, ImportFields, ImportOutcome};
use crate::services::notify;
use crate::services::outbox::OutboxStore;
use crate::services::sync_worker::{self, DrainError, DrainOutcome};
use crate::services::tracker::CaseTracker;

pub const IMPORT_DUTY: &str = "import-cases";
pub const PUSH_DUTY: &str = "push-cases";
pub const NOTIFY_DUTY: &str = "notify-sweep";
pub const DRAIN_TASK: &str = "drain-case";
pub const IMPORT_TASK: &str = "import-case";

/// Everything a sync task needs.
#[derive(Clone)]
pub struct SyncContext {
    pub pool: DbPool,
    pub outbox: Arc<PgOutbox>,
    pub tracker: Arc<dyn CaseTracker>,
    pub handlers: Arc<HandlerRegistry>,
    pub dispatcher: TaskDispatcher,
    pub public_url: String,
    pub import_fields: ImportFields,
}

impl SyncContext {
    /// Enqueue the edits for `events` and submit a drain per touched case.
    pub async fn publish(&self, events: &[DomainEvent]) -> AppResult<Vec<i64>> {
        let touched = events::publish(self.outbox.as_ref(), &self.public_url, events).await?;
        for case_id in &touched {
            self.submit_drain(*case_id);
        }
        Ok(touched)
    }

    /// Submit a background drain of one case.
    pub fn submit_drain(&self, case_id: i64) -> Submission {
        let ctx = self.clone();
        self.dispatcher
            .submit(DRAIN_TASK, case_id, move || async move {
                ctx.drain_now(case_id).await.map(|_| ())
            })
    }

    /// Drain one case in the calling task.
    pub async fn drain_now(&self, case_id: i64) -> Result<DrainOutcome, DrainError> {
        sync_worker::drain(
            self.outbox.as_ref(),
            self.tracker.as_ref(),
            &self.handlers,
            case_id,
        )
        .await
    }

    /// Submit a background import of one case.
    pub fn submit_import(&self, case_id: i64) -> Submission {
        let ctx = self.clone();
        self.dispatcher
            .submit(IMPORT_TASK, case_id, move || async move {
                import::import_case(&ctx.pool, ctx.tracker.as_ref(), &ctx.import_fields, case_id)
                    .await
                    .map(|outcome| {
                        if outcome == ImportOutcome::Imported {
                            debug!("Imported case {}", case_id);
                        }
                    })
            })
    }

    /// Import duty: submit an import for every case of a known release.
    pub async fn run_import(&self) -> AppResult<usize> {
        let ids = import::discover_case_ids(&self.pool, self.tracker.as_ref()).await?;
        let queued = ids
            .iter()
            .filter(|id| self.submit_import(**id).is_queued())
            .count();
        info!("Import duty queued {} of {} cases", queued, ids.len());
        Ok(queued)
    }

    /// Push duty: submit a drain for every case with pending edits.
    pub async fn run_push(&self) -> AppResult<usize> {
        let cases = self.outbox.cases_with_pending().await?;
        let queued = cases
            .iter()
            .filter(|id| self.submit_drain(**id).is_queued())
            .count();
        if !cases.is_empty() {
            info!("Push duty queued {} of {} cases", queued, cases.len());
        }
        Ok(queued)
    }

    /// Notify sweep: enqueue edits for terminal states missing from case tags.
    pub async fn run_notify(&self) -> AppResult<usize> {
        let achievements = notify::achievements(
            self.pool.applied_migration_facts().await?,
            self.pool.deployment_facts().await?,
            self.pool.reviewed_case_ids().await?,
        );

        let mut case_ids: Vec<i64> = achievements.iter().map(|(id, _)| *id).collect();
        case_ids.sort_unstable();
        case_ids.dedup();
        let tags = self.pool.tags_by_case(&case_ids).await?;

        let gaps = notify::find_gaps(achievements, &tags);
        let touched = notify::enqueue_gaps(self.outbox.as_ref(), gaps).await?;
        for case_id in &touched {
            self.submit_drain(*case_id);
        }
        Ok(touched.len())
    }
}

fn spawn_duty<F, Fut>(ctx: SyncContext, name: &'static str, period: Duration, duty: F)
where
    F: Fn(SyncContext) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = AppResult<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        info!("Starting {} duty (interval: {} seconds)", name, period.as_secs());

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let task_ctx = ctx.clone();
            let duty = duty.clone();
            let submission = ctx.dispatcher.submit(name, "", move || async move {
                duty(task_ctx).await.map(|_| ())
            });
            if !submission.is_queued() {
                debug!("{} duty still pending, skipping tick", name);
            }
        }
    });
}

/// Start the periodic duties.
pub fn start_scheduler(ctx: SyncContext, settings: &SchedulerSettings) {
    spawn_duty(
        ctx.clone(),
        IMPORT_DUTY,
        settings.import_interval(),
        |ctx: SyncContext| async move { ctx.run_import().await },
    );
    spawn_duty(
        ctx.clone(),
        PUSH_DUTY,
        settings.push_interval(),
        |ctx: SyncContext| async move { ctx.run_push().await },
    );
    spawn_duty(
        ctx,
        NOTIFY_DUTY,
        settings.notify_interval(),
        |ctx: SyncContext| async move { ctx.run_notify().await },
    );
}

//! Case API handlers.

use actix_web::{HttpResponse, web};
use serde::Serialize;
use tracing::warn;

use crate::auth::ApiTokenAuth;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{CaseView, PendingEditCount};
use crate::services::SyncContext;
use crate::services::outbox::OutboxStore;
use crate::services::scheduler::DRAIN_TASK;
use crate::services::sync_worker::{DrainError, DrainOutcome};
use crate::services::tracker::TrackerError;

/// Result of a manual sync.
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub case_id: i64,
    pub outcome: &'static str,
    pub applied: usize,
    pub skipped: usize,
    /// Edits still pending after the drain.
    pub pending: u64,
}

impl From<DrainError> for AppError {
    fn from(err: DrainError) -> Self {
        match err {
            DrainError::CaseMissing(case_id) => {
                AppError::NotFound(format!("Tracker case {}", case_id))
            }
            DrainError::Tracker(e) => AppError::Tracker(e),
            DrainError::Store(e) => e,
            other @ (DrainError::Rejected { .. } | DrainError::NoHandler(_)) => {
                AppError::Tracker(TrackerError::Api(other.to_string()))
            }
        }
    }
}

/// Get a case.
pub async fn get_case(
    _auth: ApiTokenAuth,
    pool: web::Data<DbPool>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let case_id = path.into_inner();
    let case = pool
        .get_case(case_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Case {}", case_id)))?;

    Ok(HttpResponse::Ok().json(CaseView::from(case)))
}

/// Number of tracker edits waiting for a case.
pub async fn pending_edit_count(
    _auth: ApiTokenAuth,
    sync: web::Data<SyncContext>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let case_id = path.into_inner();
    let pending = sync.outbox.pending_count(case_id).await?;

    Ok(HttpResponse::Ok().json(PendingEditCount {
        case_id,
        pending,
        syncing: sync.dispatcher.is_active(DRAIN_TASK, case_id),
        failed_attempts: sync.dispatcher.failures(DRAIN_TASK, case_id),
    }))
}

/// Drain a case's pending edits now.
pub async fn sync_case(
    _auth: ApiTokenAuth,
    sync: web::Data<SyncContext>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let case_id = path.into_inner();
    if sync.pool.get_case(case_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Case {}", case_id)));
    }

    let outcome = sync.drain_now(case_id).await.map_err(|e| {
        warn!("Manual sync of case {} failed: {}", case_id, e);
        AppError::from(e)
    })?;

    let (label, applied, skipped) = match outcome {
        DrainOutcome::Drained { applied, skipped } => ("drained", applied, skipped),
        DrainOutcome::Empty => ("empty", 0, 0),
        DrainOutcome::Contended => ("contended", 0, 0),
    };
    let pending = sync.outbox.pending_count(case_id).await?;

    Ok(HttpResponse::Ok().json(SyncResponse {
        case_id,
        outcome: label,
        applied,
        skipped,
        pending,
    }))
}

/// Configure case routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/cases/{case_id}").route(web::get().to(get_case)))
        .service(
            web::resource("/cases/{case_id}/edits/count").route(web::get().to(pending_edit_count)),
        )
        .service(web::resource("/cases/{case_id}/sync").route(web::post().to(sync_case)));
}

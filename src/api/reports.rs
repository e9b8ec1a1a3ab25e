//! Migration and deployment report API handlers.

use actix_web::{HttpResponse, web};
use uuid::Uuid;

use crate::auth::ApiTokenAuth;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{RecordDeploymentRequest, RecordStepReportRequest};
use crate::services::{SyncContext, reports};

/// Record the outcome of one migration step on an instance.
pub async fn record_step_report(
    _auth: ApiTokenAuth,
    sync: web::Data<SyncContext>,
    body: web::Json<RecordStepReportRequest>,
) -> AppResult<HttpResponse> {
    let (response, events) = reports::record_step_report(&sync.pool, &body).await?;
    sync.publish(&events).await?;

    Ok(HttpResponse::Ok().json(response))
}

/// Get the derived report of a migration on an instance.
pub async fn get_migration_report(
    _auth: ApiTokenAuth,
    pool: web::Data<DbPool>,
    path: web::Path<(Uuid, Uuid)>,
) -> AppResult<HttpResponse> {
    let (migration_id, instance_id) = path.into_inner();
    let report = pool
        .get_migration_report(migration_id, instance_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Report of migration {} on instance {}",
                migration_id, instance_id
            ))
        })?;

    Ok(HttpResponse::Ok().json(report))
}

/// Record a deployment run.
pub async fn record_deployment(
    _auth: ApiTokenAuth,
    sync: web::Data<SyncContext>,
    body: web::Json<RecordDeploymentRequest>,
) -> AppResult<HttpResponse> {
    let (report, events) = reports::record_deployment(&sync.pool, &body).await?;
    sync.publish(&events).await?;

    Ok(HttpResponse::Created().json(report))
}

/// Configure report routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/migration-step-reports").route(web::post().to(record_step_report)),
    )
    .service(
        web::resource("/migrations/{migration_id}/reports/{instance_id}")
            .route(web::get().to(get_migration_report)),
    )
    .service(web::resource("/deployment-reports").route(web::post().to(record_deployment)));
}

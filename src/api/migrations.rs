//! Migration API handlers.

use actix_web::{HttpResponse, web};
use serde::Serialize;

use crate::auth::ApiTokenAuth;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::{
    MigrationFilter, ReviewMigrationsRequest, StampMigrationsRequest, UpsertMigrationRequest,
};
use crate::services::{SyncContext, migrations};

#[derive(Serialize)]
struct ReviewResponse {
    changed: usize,
}

/// Create or update a migration with all of its steps.
pub async fn upsert_migration(
    _auth: ApiTokenAuth,
    sync: web::Data<SyncContext>,
    body: web::Json<UpsertMigrationRequest>,
) -> AppResult<HttpResponse> {
    let (view, events) = migrations::upsert_migration(&sync.pool, &body).await?;
    sync.publish(&events).await?;

    Ok(HttpResponse::Ok().json(view))
}

/// Mark migrations reviewed or unreviewed.
pub async fn review_migrations(
    _auth: ApiTokenAuth,
    sync: web::Data<SyncContext>,
    body: web::Json<ReviewMigrationsRequest>,
) -> AppResult<HttpResponse> {
    let events = migrations::review_migrations(&sync.pool, &body).await?;
    sync.publish(&events).await?;

    Ok(HttpResponse::Ok().json(ReviewResponse {
        changed: events.len(),
    }))
}

/// Record every step of the selected migrations as applied on an instance.
pub async fn stamp_migrations(
    _auth: ApiTokenAuth,
    sync: web::Data<SyncContext>,
    body: web::Json<StampMigrationsRequest>,
) -> AppResult<HttpResponse> {
    let (reports, events) = migrations::stamp_migrations(&sync.pool, &body).await?;
    sync.publish(&events).await?;

    Ok(HttpResponse::Ok().json(reports))
}

/// Migrations of a project in deployable order.
pub async fn sorted_migrations(
    _auth: ApiTokenAuth,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    query: web::Query<MigrationFilter>,
) -> AppResult<HttpResponse> {
    let project = path.into_inner();
    let views = migrations::sorted_migrations(&pool, &project, &query).await?;

    Ok(HttpResponse::Ok().json(views))
}

/// Configure migration routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/migrations").route(web::post().to(upsert_migration)))
        .service(web::resource("/migrations/review").route(web::post().to(review_migrations)))
        .service(web::resource("/migrations/stamp").route(web::post().to(stamp_migrations)))
        .service(
            web::resource("/projects/{project}/migrations/sorted")
                .route(web::get().to(sorted_migrations)),
        );
}

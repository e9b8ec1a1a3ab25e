//! PDT server - main entry point.
//!
//! Starts the Actix-web server, the tracker sync scheduler and the database
//! connection pool.

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pdt_lib::api;
use pdt_lib::auth::ApiToken;
use pdt_lib::config::Config;
use pdt_lib::db::{DbPool, PgOutbox};
use pdt_lib::middleware::RequestLogger;
use pdt_lib::services::handlers::HandlerRegistry;
use pdt_lib::services::import::ImportFields;
use pdt_lib::services::tracker::FogBugzClient;
use pdt_lib::services::{SyncContext, TaskDispatcher, start_scheduler};

/// Perform health check (for Docker healthcheck).
fn health_check() -> bool {
    Config::from_env().is_ok()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Check for --health-check flag (used by Docker HEALTHCHECK)
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "--health-check") {
        dotenvy::dotenv().ok();
        std::process::exit(if health_check() { 0 } else { 1 });
    }

    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        std::process::exit(1);
    }

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("");
            error!("Please check your environment variables:");
            error!("  - RUST_ENV must be set to 'development' or 'production'");
            error!("  - In production, DATABASE_URL, PDT_API_TOKEN, TRACKER_URL and TRACKER_TOKEN must be set");
            error!("  - In production, values must not match development defaults");
            std::process::exit(1);
        }
    };

    info!("========================================");
    info!("  PDT Server");
    info!("  Environment: {}", config.environment);
    info!("========================================");

    if config.is_development() {
        warn!("Running in DEVELOPMENT mode - do not use in production!");
        info!("Using development defaults for DATABASE_URL, PDT_API_TOKEN and the tracker");
    }

    let pool = match DbPool::new(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };
    info!("Database connection established");

    if let Err(e) = pool.run_migrations().await {
        error!("{}", e);
        std::process::exit(1);
    }

    let tracker = match FogBugzClient::new(&config.tracker) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build tracker client: {}", e);
            std::process::exit(1);
        }
    };
    info!("Tracker client configured for {}", config.tracker.url);

    let sync = SyncContext {
        pool: pool.clone(),
        outbox: Arc::new(PgOutbox::new(pool.clone())),
        tracker: Arc::new(tracker),
        handlers: Arc::new(HandlerRegistry::standard(&config.tracker.migration_url_field)),
        dispatcher: TaskDispatcher::new(config.scheduler.worker_concurrency),
        public_url: config.public_url.clone(),
        import_fields: ImportFields::from(&config.tracker),
    };

    start_scheduler(sync.clone(), &config.scheduler);
    info!(
        "Sync scheduler started (import: {}s, push: {}s, notify: {}s, workers: {})",
        config.scheduler.import_interval_secs,
        config.scheduler.push_interval_secs,
        config.scheduler.notify_interval_secs,
        config.scheduler.worker_concurrency
    );

    let bind_address = config.bind_address();
    let api_token = ApiToken::new(config.api_token.clone());

    let worker_count = if config.is_development() {
        info!(
            "Starting server at http://{} (4 workers - development mode)",
            bind_address
        );
        4
    } else {
        let cpus = num_cpus::get();
        info!(
            "Starting server at http://{} ({} workers)",
            bind_address, cpus
        );
        cpus
    };

    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(sync.clone()))
            .app_data(web::Data::new(api_token.clone()))
            .service(
                web::scope("/api/v1")
                    .configure(api::configure_health_routes)
                    .configure(api::configure_migration_routes)
                    .configure(api::configure_report_routes)
                    .configure(api::configure_case_routes),
            )
    });

    server
        .workers(worker_count)
        .bind(&bind_address)?
        .run()
        .await
}

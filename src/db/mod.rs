//! Database module providing connection management, migrations, and queries.

pub mod case_edits;
pub mod cases;
pub mod deployment_reports;
pub mod migration_reports;
pub mod migrations;
pub mod reference;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, RuntimeErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::migration::Migrator;

pub use case_edits::PgOutbox;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration.
    pub async fn new(config: &Config) -> AppResult<Self> {
        let mut options = ConnectOptions::new(config.database.url.clone());
        options
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .sqlx_logging(false);

        let conn = Database::connect(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to database: {}", e)))?;

        Ok(DbPool { conn })
    }

    /// Get access to the connection for executing queries.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Apply pending schema migrations.
    pub async fn run_migrations(&self) -> AppResult<()> {
        Migrator::up(&self.conn, None)
            .await
            .map_err(|e| AppError::Database(format!("Failed to run migrations: {}", e)))?;
        info!("Database migrations complete");
        Ok(())
    }
}

/// SQLSTATE `lock_not_available`.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// SQLSTATE reported by the server for a failed statement.
fn sqlstate(err: &DbErr) -> Option<String> {
    let (DbErr::Query(runtime) | DbErr::Exec(runtime)) = err else {
        return None;
    };
    match runtime {
        RuntimeErr::SqlxError(e) => e
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned()),
        _ => None,
    }
}

/// Whether a database error is a `NOWAIT` lock failure.
pub fn is_lock_unavailable(err: &DbErr) -> bool {
    sqlstate(err).as_deref() == Some(LOCK_NOT_AVAILABLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_detection_ignores_message_text() {
        let message = "could not obtain lock on row in relation \"case_edits\" (55P03)";
        assert!(!is_lock_unavailable(&DbErr::Custom(message.to_string())));
        assert!(!is_lock_unavailable(&DbErr::Query(RuntimeErr::Internal(
            message.to_string()
        ))));
    }

    #[test]
    fn test_non_database_errors_have_no_sqlstate() {
        assert_eq!(sqlstate(&DbErr::RecordNotFound("case".to_string())), None);
        assert_eq!(
            sqlstate(&DbErr::Exec(RuntimeErr::Internal("timeout".to_string()))),
            None
        );
    }
}

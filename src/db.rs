//! Database module
//!
//! Connection and schema checks for the PostgreSQL backend. The schema itself
//! lives in `migrations/`.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::{Config, ConfigError};

/// Tables the event store and audit log write to
pub const REQUIRED_TABLES: &[&str] = &["events", "event_snapshots", "idempotency_keys", "audit_logs"];

pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| sqlx::Error::Configuration(Box::new(ConfigError::MissingEnv("DATABASE_URL"))))?;

    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(config.store_timeout)
        .connect(url)
        .await
}

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}

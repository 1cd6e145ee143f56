//! Database module
//!
//! Pool construction, schema bootstrap, and schema verification.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;

const SCHEMA_SQL: &str = include_str!("../migrations/0001_spending.sql");

/// Build the shared connection pool from configuration.
pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_min_connections)
        .max_lifetime(Duration::from_secs(config.database_max_lifetime_secs))
        .connect(&config.database_url)
        .await
}

/// Apply the embedded schema. Every statement is `IF NOT EXISTS`, so this
/// is safe to run on every startup.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

/// Check if all required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let required_tables = [
        "card_accounts",
        "authorizations",
        "idempotency_keys",
        "outbox",
    ];

    for table in required_tables {
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

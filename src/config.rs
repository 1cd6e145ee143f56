//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Minimum idle database connections in pool
    pub database_min_connections: u32,

    /// Maximum lifetime of a pooled connection, in seconds
    pub database_max_lifetime_secs: u64,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Message bus endpoint the dispatcher publishes to
    pub bus_endpoint: String,

    /// Outbox entries fetched per dispatch pass
    pub outbox_batch_size: i64,

    /// Dispatcher poll interval in milliseconds
    pub outbox_poll_interval_ms: u64,

    /// Retention window for idempotency entries, in hours (minimum 24)
    pub idempotency_retention_hours: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", "10")?;
        let database_min_connections = parse_env("DATABASE_MIN_CONNECTIONS", "1")?;
        let database_max_lifetime_secs = parse_env("DATABASE_MAX_LIFETIME_SECS", "1800")?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_env("PORT", "3000")?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let bus_endpoint = env::var("BUS_ENDPOINT")
            .unwrap_or_else(|_| "http://127.0.0.1:8089/events".to_string());

        let outbox_batch_size = parse_env("OUTBOX_BATCH_SIZE", "100")?;
        let outbox_poll_interval_ms = parse_env("OUTBOX_POLL_INTERVAL_MS", "500")?;

        let idempotency_retention_hours: i64 = parse_env("IDEMPOTENCY_RETENTION_HOURS", "24")?;
        if idempotency_retention_hours < 24 {
            return Err(ConfigError::InvalidValue("IDEMPOTENCY_RETENTION_HOURS"));
        }

        Ok(Self {
            database_url,
            database_max_connections,
            database_min_connections,
            database_max_lifetime_secs,
            host,
            port,
            environment,
            bus_endpoint,
            outbox_batch_size,
            outbox_poll_interval_ms,
            idempotency_retention_hours,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.outbox_poll_interval_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

//! Scheduled Jobs
//!
//! Background maintenance: periodic deletion of idempotency entries that
//! have aged out of the retention window. Outbox rows are never purged;
//! they are retained for replay and audit.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::time::interval;

use crate::store::{self, StoreError};

/// Delete idempotency entries older than the retention window.
/// Returns the number of rows removed.
pub async fn purge_expired_idempotency_keys(
    pool: &PgPool,
    retention: chrono::Duration,
) -> Result<u64, JobError> {
    let cutoff = Utc::now() - retention;
    let rows_deleted = store::idempotency::purge_older_than(pool, cutoff).await?;

    if rows_deleted > 0 {
        tracing::info!(
            rows_deleted = rows_deleted,
            "purged expired idempotency keys"
        );
    }

    Ok(rows_deleted)
}

/// Configuration for the job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// How often the sweep runs (default: 10 minutes)
    pub sweep_interval: Duration,
    /// How long idempotency entries are retained (default: 24 hours)
    pub idempotency_retention: chrono::Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(600),
            idempotency_retention: chrono::Duration::hours(24),
        }
    }
}

/// Runs periodic maintenance tasks on their own task.
pub struct JobScheduler {
    pool: PgPool,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            config: JobSchedulerConfig::default(),
        }
    }

    pub fn with_config(pool: PgPool, config: JobSchedulerConfig) -> Self {
        Self { pool, config }
    }

    /// Start the scheduler in the background. The returned handle can be
    /// aborted at shutdown.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("job scheduler started");

        let mut ticker = interval(self.config.sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) =
                purge_expired_idempotency_keys(&self.pool, self.config.idempotency_retention).await
            {
                tracing::error!(error = %e, "idempotency key purge failed");
            }
        }
    }
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(600));
        assert_eq!(config.idempotency_retention, chrono::Duration::hours(24));
    }
}

//! Persistence layer
//!
//! Repositories for the spending aggregates, the idempotency store, and the
//! outbox, plus the [`Datastore`] coordinator that runs a set of repository
//! calls inside one database transaction.
//!
//! Repository functions are generic over `PgExecutor`, so the same code runs
//! against the shared pool (reads outside a transaction) or against a
//! transaction handle inside [`Datastore::atomic`].

pub mod authorizations;
pub mod card_accounts;
pub mod idempotency;
pub mod outbox;

use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool};

pub use idempotency::IdempotencyEntry;

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("card account not found")]
    CardAccountNotFound,

    #[error("authorization not found")]
    AuthorizationNotFound,

    /// A concurrent writer won the version check. Retryable.
    #[error("concurrent modification detected, please retry")]
    OptimisticLock,

    #[error("card account already exists for tenant")]
    AccountAlreadyExists,

    /// Stored values violate domain invariants. The detail is for logs; the
    /// client sees an opaque internal error.
    #[error("corrupt data in database: {0}")]
    CorruptData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Shared handle to the database: the connection pool plus the atomic
/// transaction coordinator.
#[derive(Debug, Clone)]
pub struct Datastore {
    pool: PgPool,
}

impl Datastore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pool access for reads that don't need a transaction.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Execute `op` within a single database transaction.
    ///
    /// The callback receives the transaction's connection and runs whatever
    /// repository calls it needs against it. If the callback returns `Ok`,
    /// the transaction commits (a commit failure is surfaced as an error);
    /// if it returns `Err`, the transaction rolls back and the error
    /// propagates. If the callback panics, the dropped transaction rolls
    /// back before the panic unwinds further.
    pub async fn atomic<T, E, F>(&self, op: F) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>> + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| E::from(StoreError::Database(e)))?;

        match op(&mut *tx).await {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| E::from(StoreError::Database(e)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}

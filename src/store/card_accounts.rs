//! Card account repository
//!
//! Persists [`CardAccount`] aggregates with optimistic locking. Every query
//! is scoped by tenant.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::domain::{CardAccount, CardAccountId, Currency, Money, TenantId};

use super::{is_unique_violation, StoreError};

type CardAccountRow = (
    Uuid,
    String,
    Decimal,
    String,
    Decimal,
    String,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// Persist a card account.
///
/// Single-statement UPSERT with the version predicate embedded in the
/// UPDATE branch:
/// - version 1 inserts
/// - version > 1 updates only when the stored version is `version - 1`
///
/// Returns [`StoreError::OptimisticLock`] when a concurrent update wins the
/// version check, and [`StoreError::AccountAlreadyExists`] when the
/// one-account-per-tenant constraint is violated.
pub async fn save<'e, E>(db: E, account: &CardAccount) -> Result<(), StoreError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO card_accounts (
            id, tenant_id,
            spending_limit_amount, spending_limit_currency,
            rolling_spend_amount, rolling_spend_currency,
            version, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE SET
            rolling_spend_amount = EXCLUDED.rolling_spend_amount,
            rolling_spend_currency = EXCLUDED.rolling_spend_currency,
            version = EXCLUDED.version,
            updated_at = EXCLUDED.updated_at
        WHERE card_accounts.version = EXCLUDED.version - 1
        "#,
    )
    .bind(account.id().as_uuid())
    .bind(account.tenant_id().as_str())
    .bind(account.spending_limit().amount())
    .bind(account.spending_limit().currency().as_str())
    .bind(account.rolling_spend().amount())
    .bind(account.rolling_spend().currency().as_str())
    .bind(account.version())
    .bind(account.created_at())
    .bind(account.updated_at())
    .execute(db)
    .await;

    let done = match result {
        Ok(done) => done,
        Err(err) if is_unique_violation(&err) => return Err(StoreError::AccountAlreadyExists),
        Err(err) => return Err(err.into()),
    };

    // An update whose version predicate missed affects zero rows.
    if account.version() > 1 && done.rows_affected() == 0 {
        return Err(StoreError::OptimisticLock);
    }
    Ok(())
}

/// Load a card account by id within a tenant.
pub async fn find_by_id<'e, E>(
    db: E,
    tenant_id: &TenantId,
    id: CardAccountId,
) -> Result<CardAccount, StoreError>
where
    E: PgExecutor<'e>,
{
    let row: Option<CardAccountRow> = sqlx::query_as(
        r#"
        SELECT id, tenant_id,
               spending_limit_amount, spending_limit_currency,
               rolling_spend_amount, rolling_spend_currency,
               version, created_at, updated_at
        FROM card_accounts
        WHERE id = $1 AND tenant_id = $2
        "#,
    )
    .bind(id.as_uuid())
    .bind(tenant_id.as_str())
    .fetch_optional(db)
    .await?;

    row.map(reconstruct)
        .transpose()?
        .ok_or(StoreError::CardAccountNotFound)
}

/// Load the card account for a tenant (unique per tenant).
pub async fn find_by_tenant<'e, E>(db: E, tenant_id: &TenantId) -> Result<CardAccount, StoreError>
where
    E: PgExecutor<'e>,
{
    let row: Option<CardAccountRow> = sqlx::query_as(
        r#"
        SELECT id, tenant_id,
               spending_limit_amount, spending_limit_currency,
               rolling_spend_amount, rolling_spend_currency,
               version, created_at, updated_at
        FROM card_accounts
        WHERE tenant_id = $1
        "#,
    )
    .bind(tenant_id.as_str())
    .fetch_optional(db)
    .await?;

    row.map(reconstruct)
        .transpose()?
        .ok_or(StoreError::CardAccountNotFound)
}

fn reconstruct(row: CardAccountRow) -> Result<CardAccount, StoreError> {
    let (
        id,
        tenant_id,
        limit_amount,
        limit_currency,
        spend_amount,
        spend_currency,
        version,
        created_at,
        updated_at,
    ) = row;

    let limit_currency: Currency = limit_currency
        .parse()
        .map_err(|e: crate::domain::MoneyError| StoreError::CorruptData(e.to_string()))?;
    let spend_currency: Currency = spend_currency
        .parse()
        .map_err(|e: crate::domain::MoneyError| StoreError::CorruptData(e.to_string()))?;
    let tenant_id =
        TenantId::new(tenant_id).map_err(|e| StoreError::CorruptData(e.to_string()))?;

    CardAccount::reconstruct(
        CardAccountId::from(id),
        tenant_id,
        Money::new(limit_amount, limit_currency),
        Money::new(spend_amount, spend_currency),
        version,
        created_at,
        updated_at,
    )
    .map_err(|e| StoreError::CorruptData(e.to_string()))
}

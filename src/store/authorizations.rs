//! Authorization repository
//!
//! Persists [`Authorization`] aggregates with the same optimistic-lock
//! UPSERT protocol as the card account repository.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::domain::{
    Authorization, AuthorizationId, AuthorizationState, CardAccountId, Currency, Money, TenantId,
};

use super::StoreError;

type AuthorizationRow = (
    Uuid,
    String,
    Uuid,
    Decimal,
    String,
    Decimal,
    String,
    String,
    String,
    String,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// Persist an authorization. Inserts at version 1; above that, updates only
/// when the stored version matches `version - 1`, returning
/// [`StoreError::OptimisticLock`] otherwise.
pub async fn save<'e, E>(db: E, auth: &Authorization) -> Result<(), StoreError>
where
    E: PgExecutor<'e>,
{
    let done = sqlx::query(
        r#"
        INSERT INTO authorizations (
            id, tenant_id, card_account_id,
            authorized_amount, authorized_currency,
            captured_amount, captured_currency,
            merchant_ref, reference, state,
            version, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO UPDATE SET
            captured_amount = EXCLUDED.captured_amount,
            captured_currency = EXCLUDED.captured_currency,
            state = EXCLUDED.state,
            version = EXCLUDED.version,
            updated_at = EXCLUDED.updated_at
        WHERE authorizations.version = EXCLUDED.version - 1
        "#,
    )
    .bind(auth.id().as_uuid())
    .bind(auth.tenant_id().as_str())
    .bind(auth.card_account_id().as_uuid())
    .bind(auth.authorized_amount().amount())
    .bind(auth.authorized_amount().currency().as_str())
    .bind(auth.captured_amount().amount())
    .bind(auth.captured_amount().currency().as_str())
    .bind(auth.merchant_ref())
    .bind(auth.reference())
    .bind(auth.state().as_str())
    .bind(auth.version())
    .bind(auth.created_at())
    .bind(auth.updated_at())
    .execute(db)
    .await?;

    if auth.version() > 1 && done.rows_affected() == 0 {
        return Err(StoreError::OptimisticLock);
    }
    Ok(())
}

/// Load an authorization by id within a tenant.
pub async fn find_by_id<'e, E>(
    db: E,
    tenant_id: &TenantId,
    id: AuthorizationId,
) -> Result<Authorization, StoreError>
where
    E: PgExecutor<'e>,
{
    let row: Option<AuthorizationRow> = sqlx::query_as(
        r#"
        SELECT id, tenant_id, card_account_id,
               authorized_amount, authorized_currency,
               captured_amount, captured_currency,
               merchant_ref, reference, state,
               version, created_at, updated_at
        FROM authorizations
        WHERE id = $1 AND tenant_id = $2
        "#,
    )
    .bind(id.as_uuid())
    .bind(tenant_id.as_str())
    .fetch_optional(db)
    .await?;

    row.map(reconstruct)
        .transpose()?
        .ok_or(StoreError::AuthorizationNotFound)
}

fn reconstruct(row: AuthorizationRow) -> Result<Authorization, StoreError> {
    let (
        id,
        tenant_id,
        card_account_id,
        authorized_amount,
        authorized_currency,
        captured_amount,
        captured_currency,
        merchant_ref,
        reference,
        state,
        version,
        created_at,
        updated_at,
    ) = row;

    let authorized_currency: Currency = authorized_currency
        .parse()
        .map_err(|e: crate::domain::MoneyError| StoreError::CorruptData(e.to_string()))?;
    let captured_currency: Currency = captured_currency
        .parse()
        .map_err(|e: crate::domain::MoneyError| StoreError::CorruptData(e.to_string()))?;
    let state: AuthorizationState = state
        .parse()
        .map_err(|e: crate::domain::CorruptState| StoreError::CorruptData(e.to_string()))?;
    let tenant_id =
        TenantId::new(tenant_id).map_err(|e| StoreError::CorruptData(e.to_string()))?;

    Authorization::reconstruct(
        AuthorizationId::from(id),
        tenant_id,
        CardAccountId::from(card_account_id),
        Money::new(authorized_amount, authorized_currency),
        Money::new(captured_amount, captured_currency),
        merchant_ref,
        reference,
        state,
        version,
        created_at,
        updated_at,
    )
    .map_err(|e| StoreError::CorruptData(e.to_string()))
}

//! Idempotency store
//!
//! Keeps one stored response per `(tenant_id, idempotency_key)` so that a
//! retried request replays the original outcome instead of repeating the
//! effect.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::domain::TenantId;

use super::StoreError;

/// A stored idempotency record: which resource a request produced and the
/// exact response that was returned for it.
#[derive(Debug, Clone)]
pub struct IdempotencyEntry {
    pub tenant_id: TenantId,
    pub idempotency_key: String,
    pub resource_id: String,
    pub status_code: i32,
    pub response_body: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

type IdempotencyRow = (String, String, String, i32, serde_json::Value, DateTime<Utc>);

fn entry_from_row(row: IdempotencyRow) -> Result<IdempotencyEntry, StoreError> {
    let (tenant_id, idempotency_key, resource_id, status_code, response_body, created_at) = row;
    let tenant_id =
        TenantId::new(tenant_id).map_err(|e| StoreError::CorruptData(e.to_string()))?;
    Ok(IdempotencyEntry {
        tenant_id,
        idempotency_key,
        resource_id,
        status_code,
        response_body,
        created_at,
    })
}

/// Fetch an entry by tenant and key. Absence is not an error.
pub async fn get<'e, E>(
    db: E,
    tenant_id: &TenantId,
    key: &str,
) -> Result<Option<IdempotencyEntry>, StoreError>
where
    E: PgExecutor<'e>,
{
    let row: Option<IdempotencyRow> = sqlx::query_as(
        r#"
        SELECT tenant_id, idempotency_key, resource_id, status_code, response_body, created_at
        FROM idempotency_keys
        WHERE tenant_id = $1 AND idempotency_key = $2
        "#,
    )
    .bind(tenant_id.as_str())
    .bind(key)
    .fetch_optional(db)
    .await?;

    row.map(entry_from_row).transpose()
}

/// Upsert an entry, overwriting any stored response.
pub async fn set<'e, E>(db: E, entry: &IdempotencyEntry) -> Result<(), StoreError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO idempotency_keys (
            tenant_id, idempotency_key, resource_id, status_code, response_body, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (tenant_id, idempotency_key) DO UPDATE SET
            resource_id = EXCLUDED.resource_id,
            status_code = EXCLUDED.status_code,
            response_body = EXCLUDED.response_body,
            created_at = EXCLUDED.created_at
        "#,
    )
    .bind(entry.tenant_id.as_str())
    .bind(&entry.idempotency_key)
    .bind(&entry.resource_id)
    .bind(entry.status_code)
    .bind(&entry.response_body)
    .bind(entry.created_at)
    .execute(db)
    .await?;

    Ok(())
}

/// Atomically store the entry if no entry exists for the key, in a single
/// round-trip.
///
/// The CTE attempts the insert with `ON CONFLICT DO NOTHING` and selects the
/// pre-existing row when the insert was skipped. Two round-trips
/// (insert-then-select) would open a window for a concurrent writer to
/// commit in between; the single statement closes it. Under N concurrent
/// calls on one key, exactly one returns `inserted = true`; the rest return
/// the winner's stored entry.
pub async fn set_if_absent<'e, E>(
    db: E,
    entry: &IdempotencyEntry,
) -> Result<(bool, IdempotencyEntry), StoreError>
where
    E: PgExecutor<'e>,
{
    let row: (
        String,
        String,
        String,
        i32,
        serde_json::Value,
        DateTime<Utc>,
        bool,
    ) = sqlx::query_as(
        r#"
        WITH new_entry AS (
            INSERT INTO idempotency_keys (
                tenant_id, idempotency_key, resource_id, status_code, response_body, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, idempotency_key) DO NOTHING
            RETURNING tenant_id, idempotency_key, resource_id, status_code, response_body, created_at
        )
        SELECT tenant_id, idempotency_key, resource_id, status_code, response_body, created_at,
               TRUE AS inserted
        FROM new_entry
        UNION ALL
        SELECT tenant_id, idempotency_key, resource_id, status_code, response_body, created_at,
               FALSE AS inserted
        FROM idempotency_keys
        WHERE tenant_id = $1 AND idempotency_key = $2
          AND NOT EXISTS (SELECT 1 FROM new_entry)
        "#,
    )
    .bind(entry.tenant_id.as_str())
    .bind(&entry.idempotency_key)
    .bind(&entry.resource_id)
    .bind(entry.status_code)
    .bind(&entry.response_body)
    .bind(entry.created_at)
    .fetch_one(db)
    .await?;

    let (tenant_id, idempotency_key, resource_id, status_code, response_body, created_at, inserted) =
        row;
    let stored = entry_from_row((
        tenant_id,
        idempotency_key,
        resource_id,
        status_code,
        response_body,
        created_at,
    ))?;

    Ok((inserted, stored))
}

/// Delete entries created before `cutoff`. Returns the number removed.
pub async fn purge_older_than<'e, E>(db: E, cutoff: DateTime<Utc>) -> Result<u64, StoreError>
where
    E: PgExecutor<'e>,
{
    let done = sqlx::query("DELETE FROM idempotency_keys WHERE created_at < $1")
        .bind(cutoff)
        .execute(db)
        .await?;

    Ok(done.rows_affected())
}

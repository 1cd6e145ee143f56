//! Outbox repository
//!
//! Append-only queue of domain events. Entries are appended inside the
//! business transaction and drained by the dispatcher.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::domain::{CausationId, CorrelationId, EventId, OutboxEntry, TenantId};

use super::StoreError;

type OutboxRow = (
    Uuid,
    String,
    String,
    String,
    Option<String>,
    serde_json::Value,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

/// Append an event to the outbox as part of the current transaction.
pub async fn append<'e, E>(db: E, entry: &OutboxEntry) -> Result<(), StoreError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO outbox (
            event_id, event_type, tenant_id, correlation_id, causation_id,
            payload, occurred_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(&entry.event_type)
    .bind(entry.tenant_id.as_str())
    .bind(entry.correlation_id.as_str())
    .bind(entry.causation_id.as_ref().map(|c| c.as_str()))
    .bind(&entry.payload)
    .bind(entry.occurred_at)
    .execute(db)
    .await?;

    Ok(())
}

/// Fetch unpublished entries, oldest first.
///
/// `FOR UPDATE SKIP LOCKED` lets concurrent dispatchers each claim a
/// disjoint slice. Call inside the transaction that will mark the batch
/// published.
pub async fn fetch_unpublished<'e, E>(db: E, limit: i64) -> Result<Vec<OutboxEntry>, StoreError>
where
    E: PgExecutor<'e>,
{
    let rows: Vec<OutboxRow> = sqlx::query_as(
        r#"
        SELECT event_id, event_type, tenant_id, correlation_id, causation_id,
               payload, occurred_at, published_at
        FROM outbox
        WHERE published_at IS NULL
        ORDER BY occurred_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(limit)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(entry_from_row).collect()
}

/// Stamp entries as published. No-op on empty input.
pub async fn mark_published<'e, E>(db: E, ids: &[EventId]) -> Result<(), StoreError>
where
    E: PgExecutor<'e>,
{
    if ids.is_empty() {
        return Ok(());
    }

    let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
    sqlx::query("UPDATE outbox SET published_at = $1 WHERE event_id = ANY($2)")
        .bind(Utc::now())
        .bind(&uuids)
        .execute(db)
        .await?;

    Ok(())
}

fn entry_from_row(row: OutboxRow) -> Result<OutboxEntry, StoreError> {
    let (
        event_id,
        event_type,
        tenant_id,
        correlation_id,
        causation_id,
        payload,
        occurred_at,
        published_at,
    ) = row;

    let tenant_id =
        TenantId::new(tenant_id).map_err(|e| StoreError::CorruptData(e.to_string()))?;

    Ok(OutboxEntry {
        id: EventId::from(event_id),
        event_type,
        tenant_id,
        correlation_id: CorrelationId::from(correlation_id),
        causation_id: causation_id.map(CausationId::new),
        payload,
        occurred_at,
        published_at,
    })
}

//! Outbox dispatcher tests: delivery, durable published markers, retry of
//! failed publishes, and skip-locked batch disjointness.
//!
//! Kept as a single sequential test so the dispatcher never races another
//! dispatcher in this binary; the shared outbox table may still hold entries
//! from other test binaries, so assertions are scoped to this test's tenant.

mod common;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use sqlx::PgPool;

use aurum::dispatcher::{DispatcherConfig, MemoryEventPublisher, OutboxDispatcher};
use aurum::domain::{CorrelationId, Currency, EventId, Money, OutboxEntry, TenantId};
use aurum::service::{CreateAuthorizationRequest, CreateCardAccountRequest};
use aurum::store::{outbox, Datastore};

async fn published_at(pool: &PgPool, id: EventId) -> Option<DateTime<Utc>> {
    sqlx::query_scalar("SELECT published_at FROM outbox WHERE event_id = $1")
        .bind(id.as_uuid())
        .fetch_one(pool)
        .await
        .expect("query outbox entry")
}

fn manual_entry(tenant: &TenantId, event_type: &str) -> OutboxEntry {
    OutboxEntry {
        id: EventId::new(),
        event_type: event_type.to_string(),
        tenant_id: tenant.clone(),
        correlation_id: CorrelationId::new(),
        causation_id: None,
        payload: serde_json::json!({ "probe": true }),
        occurred_at: Utc::now(),
        published_at: None,
    }
}

#[tokio::test]
async fn test_outbox_dispatcher_lifecycle() {
    let Some(pool) = common::try_setup().await else {
        return;
    };
    let store = Datastore::new(pool.clone());
    let service = common::service(&pool);
    let tenant = common::unique_tenant("outbox");

    service
        .create_card_account(CreateCardAccountRequest {
            tenant_id: tenant.clone(),
            spending_limit: Money::new(dec!(1000), Currency::Eur),
        })
        .await
        .unwrap();
    service
        .create_authorization(CreateAuthorizationRequest {
            tenant_id: tenant.clone(),
            idempotency_key: "auth-1".to_string(),
            amount: Money::new(dec!(100), Currency::Eur),
            merchant_ref: "merchant-42".to_string(),
            reference: "order-1".to_string(),
            correlation_id: CorrelationId::new(),
        })
        .await
        .unwrap();

    // --- Skip-locked keeps concurrent batches disjoint -------------------

    let probe = manual_entry(&tenant, "spend.expired");
    outbox::append(&pool, &probe).await.unwrap();

    let mut tx1 = pool.begin().await.unwrap();
    let first_batch = outbox::fetch_unpublished(&mut *tx1, 1).await.unwrap();
    assert_eq!(first_batch.len(), 1);

    let mut tx2 = pool.begin().await.unwrap();
    let second_batch = outbox::fetch_unpublished(&mut *tx2, 100).await.unwrap();
    assert!(
        second_batch.iter().all(|e| e.id != first_batch[0].id),
        "a locked row must not appear in a concurrent batch"
    );
    // Batches come back oldest first.
    let occurred: Vec<_> = second_batch.iter().map(|e| e.occurred_at).collect();
    let mut sorted = occurred.clone();
    sorted.sort();
    assert_eq!(occurred, sorted);

    tx1.rollback().await.unwrap();
    tx2.rollback().await.unwrap();

    // --- A failed publish leaves the entry unpublished -------------------

    let publisher = Arc::new(MemoryEventPublisher::new());
    publisher.fail_event_type("spend.expired");

    let dispatcher = OutboxDispatcher::with_config(
        store.clone(),
        publisher.clone(),
        DispatcherConfig {
            batch_size: 500,
            poll_interval: std::time::Duration::from_millis(10),
        },
    );

    let report = dispatcher.run_once().await.unwrap();
    assert!(report.failed >= 1);
    assert!(
        published_at(&pool, probe.id).await.is_none(),
        "failed entry must stay unpublished"
    );

    // The authorization event for this tenant went through on the same pass.
    let delivered = publisher.published();
    assert!(delivered
        .iter()
        .any(|e| e.tenant_id == tenant && e.event_type == "spend.authorized"));
    let auth_event_id = delivered
        .iter()
        .find(|e| e.tenant_id == tenant)
        .unwrap()
        .event_id;
    assert!(published_at(&pool, auth_event_id).await.is_some());

    // --- The next pass retries and delivers ------------------------------

    publisher.clear_failures();
    dispatcher.run_once().await.unwrap();

    assert!(
        published_at(&pool, probe.id).await.is_some(),
        "retried entry must be marked published"
    );
    let probe_envelope = publisher
        .published()
        .into_iter()
        .find(|e| e.event_id == probe.id)
        .expect("probe entry delivered on retry");
    assert_eq!(probe_envelope.event_type, "spend.expired");

    // --- Published entries are not re-dispatched -------------------------

    let before = publisher.published().len();
    dispatcher.run_once().await.unwrap();
    let after: Vec<_> = publisher
        .published()
        .into_iter()
        .filter(|e| e.tenant_id == tenant)
        .collect();
    assert_eq!(
        after.iter().filter(|e| e.event_id == probe.id).count(),
        1,
        "an already-published entry must not be delivered again"
    );
    assert!(publisher.published().len() >= before);
}

//! Outbox dispatcher
//!
//! Long-running loop that drains unpublished outbox entries to the message
//! bus and stamps them published. Delivery is at-least-once: a crash between
//! publish and mark leaves the entry unpublished and it is retried on the
//! next tick, so consumers dedupe by event id. Multiple dispatcher instances
//! may run concurrently; skip-locked row claims keep their batches disjoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::interval;

use crate::domain::EventEnvelope;
use crate::store::{self, Datastore, StoreError};

/// Errors from publishing an event to the bus.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("bus transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("bus rejected event with status {0}")]
    Rejected(u16),
}

/// Outbound seam to the message bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError>;
}

/// Publishes event envelopes as JSON to an HTTP bus endpoint.
#[derive(Debug, Clone)]
pub struct HttpEventPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEventPublisher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(envelope)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PublishError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// In-memory publisher for tests: records envelopes and can be told to fail
/// specific event types.
#[derive(Debug, Default)]
pub struct MemoryEventPublisher {
    published: Mutex<Vec<EventEnvelope>>,
    failing_event_types: Mutex<Vec<String>>,
}

impl MemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All envelopes published so far.
    pub fn published(&self) -> Vec<EventEnvelope> {
        self.published.lock().expect("publisher lock").clone()
    }

    /// Make publishes of the given event type fail until cleared.
    pub fn fail_event_type(&self, event_type: &str) {
        self.failing_event_types
            .lock()
            .expect("publisher lock")
            .push(event_type.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_event_types
            .lock()
            .expect("publisher lock")
            .clear();
    }
}

#[async_trait]
impl EventPublisher for MemoryEventPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let failing = self.failing_event_types.lock().expect("publisher lock");
        if failing.iter().any(|t| t == &envelope.event_type) {
            return Err(PublishError::Rejected(503));
        }
        drop(failing);

        self.published
            .lock()
            .expect("publisher lock")
            .push(envelope.clone());
        Ok(())
    }
}

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub batch_size: i64,
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub published: usize,
    pub failed: usize,
}

/// Polls the outbox and forwards entries to the bus.
pub struct OutboxDispatcher {
    store: Datastore,
    publisher: Arc<dyn EventPublisher>,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    pub fn new(store: Datastore, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(
        store: Datastore,
        publisher: Arc<dyn EventPublisher>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Spawn the dispatcher loop. The returned handle can be aborted at
    /// shutdown.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "outbox dispatcher started"
        );

        let mut ticker = interval(self.config.poll_interval);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(report) if report.published > 0 || report.failed > 0 => {
                    tracing::debug!(
                        published = report.published,
                        failed = report.failed,
                        "dispatch pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "dispatch pass failed");
                }
            }
        }
    }

    /// One dispatch pass: claim a batch with skip-locked, publish each
    /// entry, and mark the successes published in the same transaction.
    /// An entry whose publish fails stays unpublished and is retried on a
    /// later pass.
    pub async fn run_once(&self) -> Result<DispatchReport, StoreError> {
        let mut tx = self.store.pool().begin().await?;

        let entries = store::outbox::fetch_unpublished(&mut *tx, self.config.batch_size).await?;
        if entries.is_empty() {
            return Ok(DispatchReport::default());
        }

        let mut published_ids = Vec::with_capacity(entries.len());
        let mut failed = 0usize;

        for entry in &entries {
            match self.publisher.publish(&entry.envelope()).await {
                Ok(()) => published_ids.push(entry.id),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        event_id = %entry.id,
                        event_type = %entry.event_type,
                        error = %e,
                        "event publish failed, will retry"
                    );
                }
            }
        }

        store::outbox::mark_published(&mut *tx, &published_ids).await?;
        tx.commit().await?;

        Ok(DispatchReport {
            published: published_ids.len(),
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CorrelationId, EventId, TenantId};
    use chrono::Utc;

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(),
            event_type: event_type.to_string(),
            occurred_at: Utc::now(),
            tenant_id: TenantId::new("tenant-1").unwrap(),
            correlation_id: CorrelationId::new(),
            causation_id: None,
            payload: serde_json::json!({"ok": true}),
        }
    }

    #[tokio::test]
    async fn test_memory_publisher_records_envelopes() {
        let publisher = MemoryEventPublisher::new();
        publisher.publish(&envelope("spend.authorized")).await.unwrap();
        publisher.publish(&envelope("spend.captured")).await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].event_type, "spend.authorized");
    }

    #[tokio::test]
    async fn test_memory_publisher_failure_injection() {
        let publisher = MemoryEventPublisher::new();
        publisher.fail_event_type("spend.captured");

        let result = publisher.publish(&envelope("spend.captured")).await;
        assert!(matches!(result, Err(PublishError::Rejected(503))));

        publisher.clear_failures();
        publisher.publish(&envelope("spend.captured")).await.unwrap();
        assert_eq!(publisher.published().len(), 1);
    }

    #[test]
    fn test_dispatcher_config_default() {
        let config = DispatcherConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }
}

//! Domain Events
//!
//! Immutable facts emitted by the spending aggregates, the envelope that
//! wraps them on the wire, and the outbox entries that carry them to the
//! dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::authorization::Authorization;
use super::ids::{CausationId, CorrelationId, EventId, TenantId};
use super::money::Money;

/// Event type identifiers for the Spending context.
pub const SPEND_AUTHORIZED: &str = "spend.authorized";
pub const SPEND_CAPTURED: &str = "spend.captured";
pub const SPEND_REVERSED: &str = "spend.reversed";
pub const SPEND_EXPIRED: &str = "spend.expired";

/// Emitted when a spend is authorized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendAuthorized {
    pub authorization_id: String,
    pub tenant_id: String,
    pub card_account_id: String,
    pub amount: Money,
    pub merchant_ref: String,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Emitted when a spend is captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendCaptured {
    pub authorization_id: String,
    pub tenant_id: String,
    pub card_account_id: String,
    pub captured_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Emitted when a spend is reversed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendReversed {
    pub authorization_id: String,
    pub tenant_id: String,
    pub card_account_id: String,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Standard metadata wrapper for every event leaving the core.
/// Consumers dedupe on `event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub correlation_id: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<CausationId>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Decode the payload into a concrete event type.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// A domain event waiting in the outbox to be published.
///
/// Appended in the same transaction as the state change that produced it;
/// `published_at` stays null until the dispatcher delivers it.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: EventId,
    pub event_type: String,
    pub tenant_id: TenantId,
    pub correlation_id: CorrelationId,
    pub causation_id: Option<CausationId>,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    fn from_payload<T: Serialize>(
        event_type: &str,
        tenant_id: TenantId,
        correlation_id: CorrelationId,
        payload: &T,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: EventId::new(),
            event_type: event_type.to_string(),
            tenant_id,
            correlation_id,
            causation_id: None,
            payload: serde_json::to_value(payload)?,
            occurred_at,
            published_at: None,
        })
    }

    /// Outbox entry for a `spend.authorized` event.
    pub fn spend_authorized(
        auth: &Authorization,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let event = SpendAuthorized {
            authorization_id: auth.id().to_string(),
            tenant_id: auth.tenant_id().to_string(),
            card_account_id: auth.card_account_id().to_string(),
            amount: auth.authorized_amount().clone(),
            merchant_ref: auth.merchant_ref().to_string(),
            reference: auth.reference().to_string(),
            occurred_at: now,
        };
        Self::from_payload(
            SPEND_AUTHORIZED,
            auth.tenant_id().clone(),
            correlation_id,
            &event,
            now,
        )
    }

    /// Outbox entry for a `spend.captured` event.
    pub fn spend_captured(
        auth: &Authorization,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let event = SpendCaptured {
            authorization_id: auth.id().to_string(),
            tenant_id: auth.tenant_id().to_string(),
            card_account_id: auth.card_account_id().to_string(),
            captured_amount: auth.captured_amount().clone(),
            occurred_at: now,
        };
        Self::from_payload(
            SPEND_CAPTURED,
            auth.tenant_id().clone(),
            correlation_id,
            &event,
            now,
        )
    }

    /// Outbox entry for a `spend.reversed` event. Carries the full
    /// authorized amount that was released.
    pub fn spend_reversed(
        auth: &Authorization,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let event = SpendReversed {
            authorization_id: auth.id().to_string(),
            tenant_id: auth.tenant_id().to_string(),
            card_account_id: auth.card_account_id().to_string(),
            amount: auth.authorized_amount().clone(),
            occurred_at: now,
        };
        Self::from_payload(
            SPEND_REVERSED,
            auth.tenant_id().clone(),
            correlation_id,
            &event,
            now,
        )
    }

    /// Build the wire envelope for this entry.
    pub fn envelope(&self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.id,
            event_type: self.event_type.clone(),
            occurred_at: self.occurred_at,
            tenant_id: self.tenant_id.clone(),
            correlation_id: self.correlation_id.clone(),
            causation_id: self.causation_id.clone(),
            payload: self.payload.clone(),
        }
    }
}

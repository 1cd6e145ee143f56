//! CardAccount Aggregate
//!
//! A card account holds the spending limit for a tenant and tracks the
//! rolling spend held against it.
//!
//! # Invariants
//! - `0 <= rolling_spend <= spending_limit`
//! - rolling spend and spending limit share one currency
//! - version increases by one on every mutation

use chrono::{DateTime, Utc};

use super::error::{CorruptState, DomainError};
use super::ids::{CardAccountId, TenantId};
use super::money::Money;

/// Card account aggregate root, one per tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardAccount {
    id: CardAccountId,
    tenant_id: TenantId,
    spending_limit: Money,
    rolling_spend: Money,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CardAccount {
    /// Create a new card account with the given spending limit.
    /// The `now` parameter keeps construction pure and testable.
    pub fn new(tenant_id: TenantId, spending_limit: Money, now: DateTime<Utc>) -> Self {
        let currency = spending_limit.currency();
        Self {
            id: CardAccountId::new(),
            tenant_id,
            spending_limit,
            rolling_spend: Money::zero(currency),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a card account from persistence.
    ///
    /// Bypasses construction but still verifies structural invariants;
    /// stored state that violates them surfaces as [`CorruptState`].
    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct(
        id: CardAccountId,
        tenant_id: TenantId,
        spending_limit: Money,
        rolling_spend: Money,
        version: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, CorruptState> {
        if rolling_spend.currency() != spending_limit.currency() {
            return Err(CorruptState("rolling spend currency differs from limit"));
        }
        if rolling_spend.is_negative() {
            return Err(CorruptState("negative rolling spend"));
        }
        if rolling_spend.greater_than(&spending_limit) {
            return Err(CorruptState("rolling spend exceeds spending limit"));
        }
        if version < 1 {
            return Err(CorruptState("version below 1"));
        }
        Ok(Self {
            id,
            tenant_id,
            spending_limit,
            rolling_spend,
            version,
            created_at,
            updated_at,
        })
    }

    /// Record an authorization hold against the account.
    ///
    /// The check and the mutation are a single step; on error the account
    /// is unchanged.
    pub fn authorize(&mut self, amount: &Money, now: DateTime<Utc>) -> Result<(), DomainError> {
        if amount.currency() != self.spending_limit.currency() {
            return Err(DomainError::CurrencyMismatch);
        }

        let new_spend = self
            .rolling_spend
            .checked_add(amount)
            .map_err(|_| DomainError::CurrencyMismatch)?;

        if new_spend.greater_than(&self.spending_limit) {
            return Err(DomainError::LimitExceeded);
        }

        self.rolling_spend = new_spend;
        self.version += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Release a previously held amount (e.g. on reversal).
    pub fn release(&mut self, amount: &Money, now: DateTime<Utc>) -> Result<(), DomainError> {
        if amount.currency() != self.rolling_spend.currency() {
            return Err(DomainError::CurrencyMismatch);
        }

        let new_spend = self
            .rolling_spend
            .checked_sub(amount)
            .map_err(|_| DomainError::CurrencyMismatch)?;

        if new_spend.is_negative() {
            return Err(DomainError::SpendUnderflow);
        }

        self.rolling_spend = new_spend;
        self.version += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Remaining spending headroom: `spending_limit - rolling_spend`.
    pub fn available_limit(&self) -> Money {
        self.spending_limit
            .checked_sub(&self.rolling_spend)
            .unwrap_or_else(|_| Money::zero(self.spending_limit.currency()))
    }

    pub fn id(&self) -> CardAccountId {
        self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn spending_limit(&self) -> &Money {
        &self.spending_limit
    }

    pub fn rolling_spend(&self) -> &Money {
        &self.rolling_spend
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

//! Authorization Aggregate
//!
//! A spend authorization: a hold on a card account that is later captured,
//! reversed, or expired. Captured, Reversed, and Expired are absorbing
//! states; only Authorized accepts transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{CorruptState, DomainError};
use super::ids::{AuthorizationId, CardAccountId, TenantId};
use super::money::Money;

/// Lifecycle state of an authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationState {
    Authorized,
    Captured,
    Reversed,
    Expired,
}

impl AuthorizationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationState::Authorized => "authorized",
            AuthorizationState::Captured => "captured",
            AuthorizationState::Reversed => "reversed",
            AuthorizationState::Expired => "expired",
        }
    }
}

impl fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthorizationState {
    type Err = CorruptState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorized" => Ok(AuthorizationState::Authorized),
            "captured" => Ok(AuthorizationState::Captured),
            "reversed" => Ok(AuthorizationState::Reversed),
            "expired" => Ok(AuthorizationState::Expired),
            _ => Err(CorruptState("unknown authorization state")),
        }
    }
}

/// Authorization aggregate root.
///
/// # Invariants
/// - `0 <= captured_amount <= authorized_amount`
/// - captured and authorized amounts share one currency
/// - at most one capture; terminal states accept no further transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    id: AuthorizationId,
    tenant_id: TenantId,
    card_account_id: CardAccountId,
    authorized_amount: Money,
    captured_amount: Money,
    merchant_ref: String,
    reference: String,
    state: AuthorizationState,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Authorization {
    /// Create a new authorization in the Authorized state.
    pub fn new(
        tenant_id: TenantId,
        card_account_id: CardAccountId,
        authorized_amount: Money,
        merchant_ref: impl Into<String>,
        reference: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let currency = authorized_amount.currency();
        Self {
            id: AuthorizationId::new(),
            tenant_id,
            card_account_id,
            authorized_amount,
            captured_amount: Money::zero(currency),
            merchant_ref: merchant_ref.into(),
            reference: reference.into(),
            state: AuthorizationState::Authorized,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild an authorization from persistence, verifying structural
    /// invariants on the stored values.
    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct(
        id: AuthorizationId,
        tenant_id: TenantId,
        card_account_id: CardAccountId,
        authorized_amount: Money,
        captured_amount: Money,
        merchant_ref: String,
        reference: String,
        state: AuthorizationState,
        version: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, CorruptState> {
        if captured_amount.currency() != authorized_amount.currency() {
            return Err(CorruptState("captured currency differs from authorized"));
        }
        if !authorized_amount.is_positive() {
            return Err(CorruptState("authorized amount not positive"));
        }
        if captured_amount.is_negative() {
            return Err(CorruptState("negative captured amount"));
        }
        if captured_amount.greater_than(&authorized_amount) {
            return Err(CorruptState("captured amount exceeds authorized"));
        }
        if version < 1 {
            return Err(CorruptState("version below 1"));
        }
        Ok(Self {
            id,
            tenant_id,
            card_account_id,
            authorized_amount,
            captured_amount,
            merchant_ref,
            reference,
            state,
            version,
            created_at,
            updated_at,
        })
    }

    /// Capture the authorization. Partial capture is allowed; re-capture is
    /// not, regardless of amount.
    pub fn capture(&mut self, amount: &Money, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.state == AuthorizationState::Captured {
            return Err(DomainError::AlreadyCaptured);
        }
        if self.state != AuthorizationState::Authorized {
            return Err(DomainError::InvalidStateTransition);
        }
        if amount.currency() != self.authorized_amount.currency() {
            return Err(DomainError::CurrencyMismatch);
        }
        if amount.greater_than(&self.authorized_amount) {
            return Err(DomainError::ExceedsAuthorizedAmount);
        }

        self.captured_amount = amount.clone();
        self.state = AuthorizationState::Captured;
        self.version += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Reverse the authorization, valid only from Authorized.
    pub fn reverse(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.state != AuthorizationState::Authorized {
            return Err(DomainError::InvalidStateTransition);
        }

        self.state = AuthorizationState::Reversed;
        self.version += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Expire the authorization, valid only from Authorized. Driven by an
    /// external sweeper; no scheduler lives in this crate.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.state != AuthorizationState::Authorized {
            return Err(DomainError::InvalidStateTransition);
        }

        self.state = AuthorizationState::Expired;
        self.version += 1;
        self.updated_at = now;
        Ok(())
    }

    pub fn id(&self) -> AuthorizationId {
        self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn card_account_id(&self) -> CardAccountId {
        self.card_account_id
    }

    pub fn authorized_amount(&self) -> &Money {
        &self.authorized_amount
    }

    pub fn captured_amount(&self) -> &Money {
        &self.captured_amount
    }

    pub fn merchant_ref(&self) -> &str {
        &self.merchant_ref
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn state(&self) -> AuthorizationState {
        self.state
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;
    use rust_decimal_macros::dec;

    fn eur(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::Eur)
    }

    fn authorization(amount: rust_decimal::Decimal) -> Authorization {
        Authorization::new(
            TenantId::new("tenant-1").unwrap(),
            CardAccountId::new(),
            eur(amount),
            "merchant-42",
            "ref-1",
            Utc::now(),
        )
    }

    #[test]
    fn test_new_authorization_state() {
        let auth = authorization(dec!(100));
        assert_eq!(auth.state(), AuthorizationState::Authorized);
        assert!(auth.captured_amount().is_zero());
        assert_eq!(auth.version(), 1);
    }

    #[test]
    fn test_full_capture() {
        let mut auth = authorization(dec!(100));
        auth.capture(&eur(dec!(100)), Utc::now()).unwrap();

        assert_eq!(auth.state(), AuthorizationState::Captured);
        assert_eq!(auth.captured_amount(), &eur(dec!(100)));
        assert_eq!(auth.version(), 2);
    }

    #[test]
    fn test_partial_capture() {
        let mut auth = authorization(dec!(100));
        auth.capture(&eur(dec!(60)), Utc::now()).unwrap();

        assert_eq!(auth.state(), AuthorizationState::Captured);
        assert_eq!(auth.captured_amount(), &eur(dec!(60)));
    }

    #[test]
    fn test_recapture_rejected() {
        let mut auth = authorization(dec!(100));
        auth.capture(&eur(dec!(60)), Utc::now()).unwrap();

        let result = auth.capture(&eur(dec!(40)), Utc::now());
        assert_eq!(result, Err(DomainError::AlreadyCaptured));
        assert_eq!(auth.captured_amount(), &eur(dec!(60)));
    }

    #[test]
    fn test_capture_exceeding_authorized_rejected() {
        let mut auth = authorization(dec!(100));
        let result = auth.capture(&eur(dec!(150)), Utc::now());

        assert_eq!(result, Err(DomainError::ExceedsAuthorizedAmount));
        assert_eq!(auth.state(), AuthorizationState::Authorized);
    }

    #[test]
    fn test_capture_currency_mismatch() {
        let mut auth = authorization(dec!(100));
        let result = auth.capture(&Money::new(dec!(100), Currency::Gbp), Utc::now());
        assert_eq!(result, Err(DomainError::CurrencyMismatch));
    }

    #[test]
    fn test_reverse() {
        let mut auth = authorization(dec!(100));
        auth.reverse(Utc::now()).unwrap();
        assert_eq!(auth.state(), AuthorizationState::Reversed);
    }

    #[test]
    fn test_capture_after_reverse_is_invalid_transition() {
        let mut auth = authorization(dec!(100));
        auth.reverse(Utc::now()).unwrap();

        let result = auth.capture(&eur(dec!(100)), Utc::now());
        assert_eq!(result, Err(DomainError::InvalidStateTransition));
    }

    #[test]
    fn test_expire() {
        let mut auth = authorization(dec!(100));
        auth.expire(Utc::now()).unwrap();
        assert_eq!(auth.state(), AuthorizationState::Expired);
    }

    #[test]
    fn test_terminal_states_absorb() {
        let now = Utc::now();

        let mut captured = authorization(dec!(100));
        captured.capture(&eur(dec!(100)), now).unwrap();
        assert!(captured.reverse(now).is_err());
        assert!(captured.expire(now).is_err());

        let mut reversed = authorization(dec!(100));
        reversed.reverse(now).unwrap();
        assert!(reversed.reverse(now).is_err());
        assert!(reversed.expire(now).is_err());

        let mut expired = authorization(dec!(100));
        expired.expire(now).unwrap();
        assert!(expired.reverse(now).is_err());
        assert!(expired.capture(&eur(dec!(1)), now).is_err());
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            AuthorizationState::Authorized,
            AuthorizationState::Captured,
            AuthorizationState::Reversed,
            AuthorizationState::Expired,
        ] {
            let parsed: AuthorizationState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("pending".parse::<AuthorizationState>().is_err());
    }

    #[test]
    fn test_reconstruct_rejects_corrupt_state() {
        let over_captured = Authorization::reconstruct(
            AuthorizationId::new(),
            TenantId::new("tenant-1").unwrap(),
            CardAccountId::new(),
            eur(dec!(100)),
            eur(dec!(200)),
            "m".to_string(),
            "r".to_string(),
            AuthorizationState::Captured,
            2,
            Utc::now(),
            Utc::now(),
        );
        assert!(over_captured.is_err());

        let non_positive = Authorization::reconstruct(
            AuthorizationId::new(),
            TenantId::new("tenant-1").unwrap(),
            CardAccountId::new(),
            eur(dec!(0)),
            eur(dec!(0)),
            "m".to_string(),
            "r".to_string(),
            AuthorizationState::Authorized,
            1,
            Utc::now(),
            Utc::now(),
        );
        assert!(non_positive.is_err());
    }
}

//! Money type
//!
//! Domain primitive for monetary amounts with currency awareness.
//! Arithmetic is restricted to matching currencies; mixed-currency
//! operations fail instead of silently coercing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Usd,
    Gbp,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            "GBP" => Ok(Currency::Gbp),
            other => Err(MoneyError::UnknownCurrency(other.to_string())),
        }
    }
}

/// Errors that can occur when constructing or combining Money values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("currency mismatch")]
    CurrencyMismatch,
}

/// Money represents a monetary amount in a single currency.
///
/// Uses `rust_decimal::Decimal` for exact arithmetic. The amount itself is
/// unconstrained in sign; positivity requirements are enforced where the
/// domain demands them (authorized amounts, capture amounts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    #[serde(rename = "value")]
    amount: Decimal,
    currency: Currency,
}

impl Money {
    /// Create a new Money value.
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Zero in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    /// Parse an amount string (e.g. "100.50") into Money.
    pub fn from_str_amount(amount: &str, currency: Currency) -> Result<Self, MoneyError> {
        let value = Decimal::from_str(amount)
            .map_err(|e| MoneyError::InvalidAmount(e.to_string()))?;
        Ok(Self::new(value, currency))
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Add two Money values. Fails if currencies don't match.
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch);
        }
        Ok(Money::new(self.amount + other.amount, self.currency))
    }

    /// Subtract `other` from `self`. Fails if currencies don't match.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch);
        }
        Ok(Money::new(self.amount - other.amount, self.currency))
    }

    /// True if `self > other`. Requires matching currencies.
    pub fn greater_than(&self, other: &Money) -> bool {
        self.currency == other.currency && self.amount > other.amount
    }

    /// True if `self <= other`. Requires matching currencies.
    pub fn less_than_or_equal(&self, other: &Money) -> bool {
        self.currency == other.currency && self.amount <= other.amount
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.amount, self.currency)
    }
}

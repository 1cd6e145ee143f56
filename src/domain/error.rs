//! Domain errors
//!
//! Business-rule rejections raised by the aggregates. Messages are stable,
//! parameter-free strings; transport layers map them to status codes.

use thiserror::Error;

/// Errors raised by domain aggregates and value objects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("tenant_id is required")]
    EmptyTenantId,

    #[error("currency mismatch")]
    CurrencyMismatch,

    #[error("spending limit exceeded")]
    LimitExceeded,

    #[error("rolling spend cannot go negative")]
    SpendUnderflow,

    #[error("authorization already captured")]
    AlreadyCaptured,

    #[error("invalid state transition")]
    InvalidStateTransition,

    #[error("capture amount exceeds authorized amount")]
    ExceedsAuthorizedAmount,
}

/// Raised when persisted state violates a domain invariant. Repositories
/// translate this into an opaque internal error; the reason is for logs only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("corrupt persisted state: {0}")]
pub struct CorruptState(pub &'static str);

//! Error handling module
//!
//! Centralized error types and HTTP response conversion. Client-facing
//! messages are stable, parameter-free strings; internal detail goes to the
//! logs only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::store::{IdempotencyEntry, StoreError};

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed input, rejected before any domain logic runs.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Business-rule rejection from an aggregate.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Persistence-layer failure or sentinel.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal sentinel: a concurrent request with the same idempotency
    /// key committed first. The service rolls back, replays the stored
    /// response, and the client never sees this variant.
    #[error("idempotency conflict: concurrent request completed first")]
    IdempotencyReplay(Box<IdempotencyEntry>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Store(StoreError::Database(err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),

            AppError::Domain(domain_err) => match domain_err {
                DomainError::EmptyTenantId => (StatusCode::BAD_REQUEST, "invalid_request"),
                DomainError::CurrencyMismatch => (StatusCode::BAD_REQUEST, "currency_mismatch"),
                DomainError::ExceedsAuthorizedAmount => {
                    (StatusCode::BAD_REQUEST, "exceeds_authorized_amount")
                }
                DomainError::SpendUnderflow => (StatusCode::BAD_REQUEST, "spend_underflow"),
                DomainError::LimitExceeded => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "spending_limit_exceeded")
                }
                DomainError::AlreadyCaptured => (StatusCode::CONFLICT, "already_captured"),
                DomainError::InvalidStateTransition => {
                    (StatusCode::CONFLICT, "invalid_state_transition")
                }
            },

            AppError::Store(store_err) => match store_err {
                StoreError::CardAccountNotFound => {
                    (StatusCode::NOT_FOUND, "card_account_not_found")
                }
                StoreError::AuthorizationNotFound => {
                    (StatusCode::NOT_FOUND, "authorization_not_found")
                }
                StoreError::OptimisticLock => (StatusCode::CONFLICT, "optimistic_lock"),
                StoreError::AccountAlreadyExists => {
                    (StatusCode::CONFLICT, "card_account_exists")
                }
                StoreError::CorruptData(_) | StoreError::Database(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },

            AppError::IdempotencyReplay(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        // Internal detail stays in the logs; the client gets an opaque body.
        let message = match &self {
            AppError::Store(StoreError::CorruptData(detail)) => {
                tracing::error!(detail = %detail, "corrupt data detected");
                "internal server error".to_string()
            }
            AppError::Store(StoreError::Database(err)) => {
                tracing::error!(error = %err, "database error");
                "internal server error".to_string()
            }
            AppError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error");
                "internal server error".to_string()
            }
            AppError::IdempotencyReplay(_) => {
                tracing::error!("idempotency replay sentinel escaped the service layer");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_mapping() {
        let cases = [
            (DomainError::LimitExceeded, StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::AlreadyCaptured, StatusCode::CONFLICT),
            (DomainError::InvalidStateTransition, StatusCode::CONFLICT),
            (DomainError::CurrencyMismatch, StatusCode::BAD_REQUEST),
            (DomainError::ExceedsAuthorizedAmount, StatusCode::BAD_REQUEST),
            (DomainError::EmptyTenantId, StatusCode::BAD_REQUEST),
        ];
        for (err, expected) in cases {
            let (status, _) = AppError::from(err).status_and_code();
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn test_store_error_mapping() {
        let (status, code) = AppError::from(StoreError::OptimisticLock).status_and_code();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "optimistic_lock");

        let (status, _) = AppError::from(StoreError::CardAccountNotFound).status_and_code();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, code) =
            AppError::from(StoreError::CorruptData("bad".into())).status_and_code();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "internal_error");
    }

    #[test]
    fn test_validation_mapping() {
        let (status, code) =
            AppError::Validation("amount must be positive".into()).status_and_code();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "invalid_request");
    }
}

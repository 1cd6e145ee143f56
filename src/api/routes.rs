//! API Routes
//!
//! HTTP endpoint definitions. Tenant id and idempotency key travel in the
//! JSON body; the correlation id comes from the `X-Correlation-ID` header
//! and is generated when absent.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{AuthorizationId, CorrelationId, Currency, Money, MoneyError, TenantId};
use crate::error::AppError;
use crate::service::{
    CaptureAuthorizationRequest, CaptureAuthorizationResponse, CreateAuthorizationRequest,
    CreateAuthorizationResponse, CreateCardAccountRequest, CreateCardAccountResponse,
    GetAuthorizationResponse, GetCardAccountResponse, ReverseAuthorizationRequest,
    ReverseAuthorizationResponse, SpendingService,
};

// =========================================================================
// Request types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct AmountBody {
    pub value: String,
    pub currency: String,
}

impl AmountBody {
    fn to_money(&self) -> Result<Money, AppError> {
        let currency: Currency = self
            .currency
            .parse()
            .map_err(|e: MoneyError| AppError::Validation(e.to_string()))?;
        Money::from_str_amount(&self.value, currency)
            .map_err(|e| AppError::Validation(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCardAccountBody {
    pub tenant_id: String,
    pub spending_limit: AmountBody,
}

#[derive(Debug, Deserialize)]
pub struct CreateAuthorizationBody {
    pub tenant_id: String,
    pub idempotency_key: String,
    pub amount: AmountBody,
    #[serde(default)]
    pub merchant_ref: String,
    #[serde(default)]
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct CaptureAuthorizationBody {
    pub tenant_id: String,
    pub idempotency_key: String,
    pub amount: AmountBody,
}

#[derive(Debug, Deserialize)]
pub struct ReverseAuthorizationBody {
    pub tenant_id: String,
    pub idempotency_key: String,
}

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: String,
}

fn correlation_id(headers: &HeaderMap) -> CorrelationId {
    headers
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(CorrelationId::from_header)
        .unwrap_or_default()
}

// =========================================================================
// Router
// =========================================================================

/// Build the API router.
pub fn create_router(service: SpendingService) -> Router {
    Router::new()
        .route("/card-accounts", post(create_card_account))
        .route("/card-accounts/{tenant_id}", get(get_card_account))
        .route("/authorizations", post(create_authorization))
        .route("/authorizations/{id}", get(get_authorization))
        .route("/authorizations/{id}/capture", post(capture_authorization))
        .route("/authorizations/{id}/reverse", post(reverse_authorization))
        .with_state(service)
}

// =========================================================================
// Handlers
// =========================================================================

async fn create_card_account(
    State(service): State<SpendingService>,
    Json(body): Json<CreateCardAccountBody>,
) -> Result<(StatusCode, Json<CreateCardAccountResponse>), AppError> {
    let response = service
        .create_card_account(CreateCardAccountRequest {
            tenant_id: TenantId::new(body.tenant_id)?,
            spending_limit: body.spending_limit.to_money()?,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_card_account(
    State(service): State<SpendingService>,
    Path(tenant_id): Path<String>,
) -> Result<Json<GetCardAccountResponse>, AppError> {
    let tenant_id = TenantId::new(tenant_id)?;
    let response = service.get_card_account(&tenant_id).await?;
    Ok(Json(response))
}

async fn create_authorization(
    State(service): State<SpendingService>,
    headers: HeaderMap,
    Json(body): Json<CreateAuthorizationBody>,
) -> Result<(StatusCode, Json<CreateAuthorizationResponse>), AppError> {
    let response = service
        .create_authorization(CreateAuthorizationRequest {
            tenant_id: TenantId::new(body.tenant_id)?,
            idempotency_key: body.idempotency_key,
            amount: body.amount.to_money()?,
            merchant_ref: body.merchant_ref,
            reference: body.reference,
            correlation_id: correlation_id(&headers),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_authorization(
    State(service): State<SpendingService>,
    Path(id): Path<Uuid>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<GetAuthorizationResponse>, AppError> {
    let tenant_id = TenantId::new(query.tenant_id)?;
    let response = service
        .get_authorization(&tenant_id, AuthorizationId::from(id))
        .await?;
    Ok(Json(response))
}

async fn capture_authorization(
    State(service): State<SpendingService>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<CaptureAuthorizationBody>,
) -> Result<Json<CaptureAuthorizationResponse>, AppError> {
    let response = service
        .capture_authorization(CaptureAuthorizationRequest {
            tenant_id: TenantId::new(body.tenant_id)?,
            authorization_id: AuthorizationId::from(id),
            idempotency_key: body.idempotency_key,
            amount: body.amount.to_money()?,
            correlation_id: correlation_id(&headers),
        })
        .await?;

    Ok(Json(response))
}

async fn reverse_authorization(
    State(service): State<SpendingService>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ReverseAuthorizationBody>,
) -> Result<Json<ReverseAuthorizationResponse>, AppError> {
    let response = service
        .reverse_authorization(ReverseAuthorizationRequest {
            tenant_id: TenantId::new(body.tenant_id)?,
            authorization_id: AuthorizationId::from(id),
            idempotency_key: body.idempotency_key,
            correlation_id: correlation_id(&headers),
        })
        .await?;

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_body_to_money() {
        let body = AmountBody {
            value: "100.50".to_string(),
            currency: "EUR".to_string(),
        };
        let money = body.to_money().unwrap();
        assert_eq!(money.currency(), Currency::Eur);
    }

    #[test]
    fn test_amount_body_rejects_unknown_currency() {
        let body = AmountBody {
            value: "100".to_string(),
            currency: "XYZ".to_string(),
        };
        assert!(matches!(body.to_money(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_amount_body_rejects_garbage_value() {
        let body = AmountBody {
            value: "one hundred".to_string(),
            currency: "EUR".to_string(),
        };
        assert!(matches!(body.to_money(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_correlation_id_generated_when_header_missing() {
        let headers = HeaderMap::new();
        let id = correlation_id(&headers);
        assert!(!id.as_str().is_empty());
    }

    #[test]
    fn test_correlation_id_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Correlation-ID", "req-42".parse().unwrap());
        let id = correlation_id(&headers);
        assert_eq!(id.as_str(), "req-42");
    }
}

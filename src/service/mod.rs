//! Spending application service
//!
//! Orchestrates the authorize / capture / reverse use cases. Every write
//! follows the same skeleton: fast-path idempotency read, atomic scope,
//! load aggregate, domain transition, persist aggregate + outbox entry +
//! idempotency entry, commit.
//!
//! The idempotency insert happens inside the same transaction as the domain
//! writes, after the domain mutation, so the stored resource id is the id
//! of the actually-created resource and a crash can never separate the
//! state change from its idempotency record.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;

use crate::domain::{
    Authorization, AuthorizationId, CardAccount, CorrelationId, Money, OutboxEntry, TenantId,
};
use crate::error::{AppError, AppResult};
use crate::store::{self, Datastore, IdempotencyEntry, StoreError};

const MAX_LOCK_RETRIES: u32 = 3;

const STATUS_CREATED: i32 = 201;
const STATUS_OK: i32 = 200;

/// Application service for the Spending context.
#[derive(Debug, Clone)]
pub struct SpendingService {
    store: Datastore,
}

// =========================================================================
// Requests and responses
// =========================================================================

#[derive(Debug, Clone)]
pub struct CreateCardAccountRequest {
    pub tenant_id: TenantId,
    pub spending_limit: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCardAccountResponse {
    pub card_account_id: String,
}

#[derive(Debug, Clone)]
pub struct CreateAuthorizationRequest {
    pub tenant_id: TenantId,
    pub idempotency_key: String,
    pub amount: Money,
    pub merchant_ref: String,
    pub reference: String,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuthorizationResponse {
    pub authorization_id: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct CaptureAuthorizationRequest {
    pub tenant_id: TenantId,
    pub authorization_id: AuthorizationId,
    pub idempotency_key: String,
    pub amount: Money,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureAuthorizationResponse {
    pub authorization_id: String,
    pub status: String,
    pub captured_amount: String,
}

#[derive(Debug, Clone)]
pub struct ReverseAuthorizationRequest {
    pub tenant_id: TenantId,
    pub authorization_id: AuthorizationId,
    pub idempotency_key: String,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseAuthorizationResponse {
    pub authorization_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAuthorizationResponse {
    pub authorization_id: String,
    pub card_account_id: String,
    pub authorized_amount: Money,
    pub captured_amount: Money,
    pub merchant_ref: String,
    pub reference: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCardAccountResponse {
    pub card_account_id: String,
    pub spending_limit: Money,
    pub rolling_spend: Money,
    pub available_limit: Money,
}

// =========================================================================
// Idempotency helpers
// =========================================================================

fn decode_entry<T: DeserializeOwned>(entry: &IdempotencyEntry) -> AppResult<T> {
    serde_json::from_value(entry.response_body.clone()).map_err(AppError::from)
}

/// Atomically record the idempotency entry for a completed write. If a
/// concurrent request with the same key committed first, returns the
/// replay sentinel so the enclosing transaction rolls back and the caller
/// serves the winner's stored response.
async fn store_idempotency<T: Serialize>(
    conn: &mut PgConnection,
    tenant_id: &TenantId,
    key: &str,
    resource_id: &str,
    status_code: i32,
    response: &T,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let entry = IdempotencyEntry {
        tenant_id: tenant_id.clone(),
        idempotency_key: key.to_string(),
        resource_id: resource_id.to_string(),
        status_code,
        response_body: serde_json::to_value(response)?,
        created_at: now,
    };

    let (inserted, stored) = store::idempotency::set_if_absent(&mut *conn, &entry).await?;
    if !inserted {
        return Err(AppError::IdempotencyReplay(Box::new(stored)));
    }
    Ok(())
}

impl SpendingService {
    pub fn new(store: Datastore) -> Self {
        Self { store }
    }

    /// Fast-path idempotency read, outside any transaction.
    async fn cached_response<T: DeserializeOwned>(
        &self,
        tenant_id: &TenantId,
        key: &str,
    ) -> AppResult<Option<T>> {
        match store::idempotency::get(self.store.pool(), tenant_id, key).await? {
            Some(entry) => Ok(Some(decode_entry(&entry)?)),
            None => Ok(None),
        }
    }

    /// Retry an operation a bounded number of times on optimistic-lock
    /// conflicts, reloading fresh state each attempt.
    async fn with_conflict_retry<T, F, Fut>(&self, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Err(AppError::Store(StoreError::OptimisticLock)) if attempt < MAX_LOCK_RETRIES => {
                    tracing::warn!(
                        attempt,
                        max = MAX_LOCK_RETRIES,
                        "optimistic lock conflict, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                other => return other,
            }
        }
    }

    // =====================================================================
    // Card accounts
    // =====================================================================

    /// Create the card account for a tenant, typically at onboarding.
    /// The one-account-per-tenant rule is enforced by the store.
    pub async fn create_card_account(
        &self,
        req: CreateCardAccountRequest,
    ) -> AppResult<CreateCardAccountResponse> {
        if req.spending_limit.is_negative() {
            return Err(AppError::Validation(
                "spending_limit must not be negative".to_string(),
            ));
        }

        let tenant_id = req.tenant_id.clone();
        let spending_limit = req.spending_limit.clone();

        self.store
            .atomic(move |conn: &mut PgConnection| {
                Box::pin(async move {
                    let account = CardAccount::new(tenant_id.clone(), spending_limit, Utc::now());
                    store::card_accounts::save(&mut *conn, &account).await?;

                    tracing::info!(
                        card_account_id = %account.id(),
                        tenant_id = %tenant_id,
                        spending_limit = %account.spending_limit(),
                        "card account created"
                    );

                    Ok(CreateCardAccountResponse {
                        card_account_id: account.id().to_string(),
                    })
                })
            })
            .await
    }

    /// Fetch a tenant's card account with its computed available limit.
    pub async fn get_card_account(
        &self,
        tenant_id: &TenantId,
    ) -> AppResult<GetCardAccountResponse> {
        let account = store::card_accounts::find_by_tenant(self.store.pool(), tenant_id).await?;

        Ok(GetCardAccountResponse {
            card_account_id: account.id().to_string(),
            spending_limit: account.spending_limit().clone(),
            rolling_spend: account.rolling_spend().clone(),
            available_limit: account.available_limit(),
        })
    }

    // =====================================================================
    // Authorize
    // =====================================================================

    /// Create a new spend authorization against the tenant's card account.
    pub async fn create_authorization(
        &self,
        req: CreateAuthorizationRequest,
    ) -> AppResult<CreateAuthorizationResponse> {
        if !req.amount.is_positive() {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        if req.idempotency_key.trim().is_empty() {
            return Err(AppError::Validation(
                "idempotency_key is required".to_string(),
            ));
        }

        // Pure retries never open a write transaction.
        if let Some(cached) = self
            .cached_response(&req.tenant_id, &req.idempotency_key)
            .await?
        {
            return Ok(cached);
        }

        let outcome = self
            .with_conflict_retry(|| self.authorize_once(&req))
            .await;

        match outcome {
            Err(AppError::IdempotencyReplay(entry)) => decode_entry(&entry),
            other => other,
        }
    }

    async fn authorize_once(
        &self,
        req: &CreateAuthorizationRequest,
    ) -> AppResult<CreateAuthorizationResponse> {
        let tenant_id = req.tenant_id.clone();
        let idempotency_key = req.idempotency_key.clone();
        let amount = req.amount.clone();
        let merchant_ref = req.merchant_ref.clone();
        let reference = req.reference.clone();
        let correlation_id = req.correlation_id.clone();

        self.store
            .atomic(move |conn: &mut PgConnection| {
                Box::pin(async move {
                    let now = Utc::now();

                    let mut account =
                        store::card_accounts::find_by_tenant(&mut *conn, &tenant_id).await?;
                    account.authorize(&amount, now)?;

                    let auth = Authorization::new(
                        tenant_id.clone(),
                        account.id(),
                        amount,
                        merchant_ref,
                        reference,
                        now,
                    );

                    store::card_accounts::save(&mut *conn, &account).await?;
                    store::authorizations::save(&mut *conn, &auth).await?;

                    let entry = OutboxEntry::spend_authorized(&auth, correlation_id, now)?;
                    store::outbox::append(&mut *conn, &entry).await?;

                    let response = CreateAuthorizationResponse {
                        authorization_id: auth.id().to_string(),
                        status: auth.state().to_string(),
                    };

                    store_idempotency(
                        &mut *conn,
                        &tenant_id,
                        &idempotency_key,
                        &auth.id().to_string(),
                        STATUS_CREATED,
                        &response,
                        now,
                    )
                    .await?;

                    tracing::info!(
                        authorization_id = %auth.id(),
                        tenant_id = %tenant_id,
                        amount = %auth.authorized_amount(),
                        "authorization created"
                    );

                    Ok(response)
                })
            })
            .await
    }

    // =====================================================================
    // Capture
    // =====================================================================

    /// Capture an existing authorization. Partial capture is allowed.
    pub async fn capture_authorization(
        &self,
        req: CaptureAuthorizationRequest,
    ) -> AppResult<CaptureAuthorizationResponse> {
        if !req.amount.is_positive() {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        if req.idempotency_key.trim().is_empty() {
            return Err(AppError::Validation(
                "idempotency_key is required".to_string(),
            ));
        }

        if let Some(cached) = self
            .cached_response(&req.tenant_id, &req.idempotency_key)
            .await?
        {
            return Ok(cached);
        }

        let outcome = self.with_conflict_retry(|| self.capture_once(&req)).await;

        match outcome {
            Err(AppError::IdempotencyReplay(entry)) => decode_entry(&entry),
            other => other,
        }
    }

    async fn capture_once(
        &self,
        req: &CaptureAuthorizationRequest,
    ) -> AppResult<CaptureAuthorizationResponse> {
        let tenant_id = req.tenant_id.clone();
        let authorization_id = req.authorization_id;
        let idempotency_key = req.idempotency_key.clone();
        let amount = req.amount.clone();
        let correlation_id = req.correlation_id.clone();

        self.store
            .atomic(move |conn: &mut PgConnection| {
                Box::pin(async move {
                    let now = Utc::now();

                    let mut auth = store::authorizations::find_by_id(
                        &mut *conn,
                        &tenant_id,
                        authorization_id,
                    )
                    .await?;
                    auth.capture(&amount, now)?;

                    store::authorizations::save(&mut *conn, &auth).await?;

                    let entry = OutboxEntry::spend_captured(&auth, correlation_id, now)?;
                    store::outbox::append(&mut *conn, &entry).await?;

                    let response = CaptureAuthorizationResponse {
                        authorization_id: auth.id().to_string(),
                        status: auth.state().to_string(),
                        captured_amount: auth.captured_amount().to_string(),
                    };

                    store_idempotency(
                        &mut *conn,
                        &tenant_id,
                        &idempotency_key,
                        &auth.id().to_string(),
                        STATUS_OK,
                        &response,
                        now,
                    )
                    .await?;

                    tracing::info!(
                        authorization_id = %auth.id(),
                        tenant_id = %tenant_id,
                        captured_amount = %auth.captured_amount(),
                        "authorization captured"
                    );

                    Ok(response)
                })
            })
            .await
    }

    // =====================================================================
    // Reverse
    // =====================================================================

    /// Reverse an authorization, releasing the held amount back to the
    /// card account.
    pub async fn reverse_authorization(
        &self,
        req: ReverseAuthorizationRequest,
    ) -> AppResult<ReverseAuthorizationResponse> {
        if req.idempotency_key.trim().is_empty() {
            return Err(AppError::Validation(
                "idempotency_key is required".to_string(),
            ));
        }

        if let Some(cached) = self
            .cached_response(&req.tenant_id, &req.idempotency_key)
            .await?
        {
            return Ok(cached);
        }

        let outcome = self.with_conflict_retry(|| self.reverse_once(&req)).await;

        match outcome {
            Err(AppError::IdempotencyReplay(entry)) => decode_entry(&entry),
            other => other,
        }
    }

    async fn reverse_once(
        &self,
        req: &ReverseAuthorizationRequest,
    ) -> AppResult<ReverseAuthorizationResponse> {
        let tenant_id = req.tenant_id.clone();
        let authorization_id = req.authorization_id;
        let idempotency_key = req.idempotency_key.clone();
        let correlation_id = req.correlation_id.clone();

        self.store
            .atomic(move |conn: &mut PgConnection| {
                Box::pin(async move {
                    let now = Utc::now();

                    let mut auth = store::authorizations::find_by_id(
                        &mut *conn,
                        &tenant_id,
                        authorization_id,
                    )
                    .await?;
                    let mut account = store::card_accounts::find_by_id(
                        &mut *conn,
                        &tenant_id,
                        auth.card_account_id(),
                    )
                    .await?;

                    auth.reverse(now)?;
                    let released = auth.authorized_amount().clone();
                    account.release(&released, now)?;

                    store::card_accounts::save(&mut *conn, &account).await?;
                    store::authorizations::save(&mut *conn, &auth).await?;

                    let entry = OutboxEntry::spend_reversed(&auth, correlation_id, now)?;
                    store::outbox::append(&mut *conn, &entry).await?;

                    let response = ReverseAuthorizationResponse {
                        authorization_id: auth.id().to_string(),
                        status: auth.state().to_string(),
                    };

                    store_idempotency(
                        &mut *conn,
                        &tenant_id,
                        &idempotency_key,
                        &auth.id().to_string(),
                        STATUS_OK,
                        &response,
                        now,
                    )
                    .await?;

                    tracing::info!(
                        authorization_id = %auth.id(),
                        tenant_id = %tenant_id,
                        released_amount = %auth.authorized_amount(),
                        "authorization reversed"
                    );

                    Ok(response)
                })
            })
            .await
    }

    // =====================================================================
    // Reads
    // =====================================================================

    /// Fetch an authorization by id. Read-only, no transaction.
    pub async fn get_authorization(
        &self,
        tenant_id: &TenantId,
        id: AuthorizationId,
    ) -> AppResult<GetAuthorizationResponse> {
        let auth = store::authorizations::find_by_id(self.store.pool(), tenant_id, id).await?;

        Ok(GetAuthorizationResponse {
            authorization_id: auth.id().to_string(),
            card_account_id: auth.card_account_id().to_string(),
            authorized_amount: auth.authorized_amount().clone(),
            captured_amount: auth.captured_amount().clone(),
            merchant_ref: auth.merchant_ref().to_string(),
            reference: auth.reference().to_string(),
            status: auth.state().to_string(),
            created_at: auth.created_at().to_rfc3339(),
            updated_at: auth.updated_at().to_rfc3339(),
        })
    }
}

//! Common test utilities
//!
//! Integration tests need a Postgres instance; they skip themselves when
//! DATABASE_URL is not set. Tests isolate through unique tenant ids rather
//! than truncation, so they can run in parallel against one database.

#![allow(dead_code)]

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use aurum::domain::TenantId;
use aurum::service::SpendingService;
use aurum::store::Datastore;

/// Connect to the test database and make sure the schema exists.
/// Returns None when DATABASE_URL is not set, in which case the caller
/// should skip the test.
pub async fn try_setup() -> Option<PgPool> {
    dotenvy::dotenv().ok();

    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("skipping: DATABASE_URL not set");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    aurum::db::ensure_schema(&pool)
        .await
        .expect("Failed to apply schema");

    Some(pool)
}

/// Build a spending service over the given pool.
pub fn service(pool: &PgPool) -> SpendingService {
    SpendingService::new(Datastore::new(pool.clone()))
}

/// A tenant id no other test run shares.
pub fn unique_tenant(prefix: &str) -> TenantId {
    TenantId::new(format!("{}-{}", prefix, uuid::Uuid::new_v4())).unwrap()
}

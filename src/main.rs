//! aurum - Spend Management Backend
//!
//! Serves the spending API (authorize / capture / reverse), runs the outbox
//! dispatcher that forwards domain events to the message bus, and sweeps
//! expired idempotency keys in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aurum::dispatcher::{DispatcherConfig, HttpEventPublisher, OutboxDispatcher};
use aurum::jobs::{JobScheduler, JobSchedulerConfig};
use aurum::service::SpendingService;
use aurum::store::Datastore;
use aurum::{api, db, Config};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aurum=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router
fn build_router(service: SpendingService) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::create_router(service))
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Starting aurum server");
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config).await?;

    db::ensure_schema(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let store = Datastore::new(pool.clone());
    let service = SpendingService::new(store.clone());

    // Outbox dispatcher runs independently of request handling.
    let publisher = Arc::new(HttpEventPublisher::new(config.bus_endpoint.clone()));
    let dispatcher = OutboxDispatcher::with_config(
        store,
        publisher,
        DispatcherConfig {
            batch_size: config.outbox_batch_size,
            poll_interval: config.outbox_poll_interval(),
        },
    );
    let dispatcher_handle = dispatcher.start();

    let jobs = JobScheduler::with_config(
        pool.clone(),
        JobSchedulerConfig {
            idempotency_retention: chrono::Duration::hours(config.idempotency_retention_hours),
            ..JobSchedulerConfig::default()
        },
    );
    let jobs_handle = jobs.start();

    tracing::info!("Listening on http://{}", addr);

    let app = build_router(service);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    dispatcher_handle.abort();
    jobs_handle.abort();
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

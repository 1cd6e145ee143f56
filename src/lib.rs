//! Aurum Library
//!
//! Transactional core of a multi-tenant spend-management backend: spending
//! aggregates, an idempotency store, a transactional outbox, the atomic
//! transaction coordinator, and the dispatcher that drains events to the
//! message bus.

pub mod api;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};

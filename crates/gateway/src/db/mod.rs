//! Persistence for the gateway.
//!
//! # Tables (schema `gateway`)
//!
//! - `store_credential` - Offline access token per installed shop
//! - `shop_user` - Application user created on first install
//! - `webhook_idempotency` - Delivery ids seen within the dedup window
//! - `webhook_job` - Verified webhook payloads awaiting the background worker
//!
//! Sessions live in the `tower_sessions` schema managed by
//! `tower-sessions-sqlx-store`.
//!
//! Every store is a trait with a `PostgreSQL` implementation and an
//! in-memory one in [`memory`] for single-instance development and tests.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/gateway/migrations/` and run via:
//! ```bash
//! cargo run -p shopgate-cli -- migrate
//! ```

pub mod credentials;
pub mod idempotency;
pub mod jobs;
pub mod memory;
pub mod users;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use credentials::{CredentialStore, NewStoreCredential, PgCredentialStore, StoreCredential};
pub use idempotency::{CheckAndSet, IdempotencyError, IdempotencyStore, PgIdempotencyStore};
pub use jobs::{JobQueue, PgJobQueue, QueueError, WebhookJob};
pub use users::{PgUserStore, ShopUser, UserStore};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

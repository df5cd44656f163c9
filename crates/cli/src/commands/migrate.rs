//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! shopgate migrate
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_DATABASE_URL` - `PostgreSQL` connection string
//!
//! # Migration Files
//!
//! Gateway tables: `crates/gateway/migrations/`. The session table is
//! created by `tower-sessions-sqlx-store` in its own schema.

use thiserror::Error;
use tower_sessions_sqlx_store::PostgresStore;

use super::{CommandError, connect};

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Could not connect.
    #[error(transparent)]
    Connect(#[from] CommandError),

    /// A migration failed to apply.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The session table could not be created.
    #[error("Session store migration error: {0}")]
    Sessions(#[from] sqlx::Error),
}

/// Run gateway and session store migrations.
pub async fn run() -> Result<(), MigrationError> {
    let pool = connect().await?;

    tracing::info!("Running gateway migrations...");
    sqlx::migrate!("../gateway/migrations").run(&pool).await?;

    tracing::info!("Preparing session store...");
    PostgresStore::new(pool.clone()).migrate().await?;

    tracing::info!("Migrations complete!");
    Ok(())
}

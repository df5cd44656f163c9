//! CLI subcommand implementations.

pub mod credentials;
pub mod idempotency;
pub mod migrate;
pub mod webhook;

use secrecy::SecretString;
use sqlx::PgPool;
use thiserror::Error;

/// Errors shared by every database-backed command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Repository operation failed.
    #[error("{0}")]
    Repository(#[from] shopgate_gateway::db::RepositoryError),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Connect to the gateway database named by `GATEWAY_DATABASE_URL`
/// (or `DATABASE_URL`).
pub async fn connect() -> Result<PgPool, CommandError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("GATEWAY_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| CommandError::MissingEnvVar("GATEWAY_DATABASE_URL"))?;

    tracing::info!("Connecting to gateway database...");
    Ok(shopgate_gateway::db::create_pool(&SecretString::from(database_url)).await?)
}

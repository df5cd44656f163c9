//! Webhook tooling.
//!
//! # Usage
//!
//! ```bash
//! # Print the X-Shopify-Hmac-Sha256 value for a payload (stdin if no file)
//! shopgate webhook sign --file payload.json
//!
//! # Re-run mandatory subscription registration for an installed shop
//! shopgate webhook register acme.myshopify.com
//! ```
//!
//! # Environment Variables
//!
//! - `SHOPIFY_CLIENT_SECRET` - Signing secret (both commands)
//! - `GATEWAY_DATABASE_URL`, `GATEWAY_BASE_URL` - Required by `register`

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use shopgate_core::ShopDomain;
use shopgate_gateway::config::{ConfigError, GatewayConfig};
use shopgate_gateway::db::{CredentialStore, PgCredentialStore};
use shopgate_gateway::services::{ComplianceWebhookRegistrar, TopicOutcome};
use shopgate_gateway::shopify::hmac::compute_webhook_hmac;
use shopgate_gateway::shopify::{ShopifyClient, ShopifyError};
use thiserror::Error;

use super::{CommandError, connect};

/// Errors that can occur in webhook commands.
#[derive(Debug, Error)]
pub enum WebhookCommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Payload could not be read.
    #[error("Failed to read payload: {0}")]
    Io(#[from] std::io::Error),

    /// Gateway configuration is incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Platform client could not be built.
    #[error(transparent)]
    Platform(#[from] ShopifyError),

    /// Database-backed step failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// No active credential for the shop.
    #[error("No active credential for {0}")]
    NotInstalled(ShopDomain),

    /// Some subscriptions could not be created.
    #[error("{0} topic(s) failed to register")]
    Incomplete(usize),
}

/// Print the signature the platform would attach to the payload.
pub fn sign(file: Option<&Path>) -> Result<(), WebhookCommandError> {
    dotenvy::dotenv().ok();

    let secret = std::env::var("SHOPIFY_CLIENT_SECRET")
        .map_err(|_| WebhookCommandError::MissingEnvVar("SHOPIFY_CLIENT_SECRET"))?;

    let body = match file {
        Some(path) => std::fs::read(path)?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    #[allow(clippy::print_stdout)]
    {
        println!("{}", compute_webhook_hmac(&body, secret.as_bytes()));
    }

    Ok(())
}

/// Reconcile mandatory webhook subscriptions for an installed shop.
pub async fn register(shop: &str) -> Result<(), WebhookCommandError> {
    let config = GatewayConfig::from_env()?;
    let shop = ShopDomain::normalize_with_suffix(shop, &config.shopify.shop_suffix)
        .map_err(|e| CommandError::InvalidArgument(e.to_string()))?;

    let store = PgCredentialStore::new(connect().await?);
    let credential = store
        .get_by_shop(&shop)
        .await
        .map_err(CommandError::from)?
        .filter(|c| c.is_active)
        .ok_or_else(|| WebhookCommandError::NotInstalled(shop.clone()))?;

    let platform = Arc::new(ShopifyClient::new(&config.shopify)?);
    let registrar = ComplianceWebhookRegistrar::new(platform, config.base_url.clone());
    let report = registrar.reconcile(&shop, &credential.access_token).await;

    for (topic, outcome) in &report.outcomes {
        match outcome {
            TopicOutcome::Failed(reason) => {
                tracing::error!(topic = %topic, reason = %reason, "Registration failed");
            }
            other => tracing::info!(topic = %topic, outcome = ?other, "Subscription ok"),
        }
    }

    let failed = report.failures().count();
    if failed > 0 {
        return Err(WebhookCommandError::Incomplete(failed));
    }

    tracing::info!(
        shop = %shop,
        created = report.created(),
        "Webhook subscriptions complete"
    );
    Ok(())
}

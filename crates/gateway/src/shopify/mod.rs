//! Platform (Shopify) integration: signature verification and Admin API client.
//!
//! # Security
//!
//! The client secret held here is both the OAuth client credential and the
//! HMAC key for callbacks and webhooks. Access tokens returned by the token
//! exchange grant offline access to a shop and are wrapped in `SecretString`.
//!
//! # Architecture
//!
//! - [`hmac`] - Pure signature verification, no I/O
//! - [`ShopifyClient`] - reqwest-based implementation of [`PlatformApi`]
//! - [`PlatformApi`] - The seam the installation flow and registrar depend on,
//!   so both can be exercised against a fake

mod client;
pub mod hmac;

pub use client::{ShopifyClient, authorization_url};

use async_trait::async_trait;
use secrecy::SecretString;
use shopgate_core::{ShopDomain, WebhookTopic};
use thiserror::Error;

/// Errors that can occur when interacting with the platform.
#[derive(Debug, Error)]
pub enum ShopifyError {
    /// HTTP request failed (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform answered with a non-success status.
    #[error("Unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// GraphQL query returned errors.
    #[error("GraphQL errors: {}", format_graphql_errors(.0))]
    GraphQL(Vec<GraphQLError>),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Rate limited by the platform.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Authentication/authorization failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// User error from a mutation (e.g., invalid callback URL).
    #[error("User error: {0}")]
    UserError(String),
}

/// A GraphQL error returned by the Admin API.
#[derive(Debug, Clone)]
pub struct GraphQLError {
    /// Error message.
    pub message: String,
    /// Path to the error in the response.
    pub path: Vec<serde_json::Value>,
}

fn format_graphql_errors(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.clone())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Offline access token obtained from the authorization-code exchange.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct AccessToken {
    /// The token used for Admin API calls.
    pub access_token: SecretString,
    /// Granted scopes, as returned by the platform.
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Shop metadata fetched right after install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopMetadata {
    /// Platform-assigned global id, e.g. `gid://shopify/Shop/1`.
    pub platform_shop_id: String,
    /// Display name.
    pub name: String,
}

/// A webhook subscription registered on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSubscription {
    /// Platform id of the subscription.
    pub id: String,
    /// Subscribed topic.
    pub topic: WebhookTopic,
    /// Delivery address, if the subscription uses an HTTP endpoint.
    pub callback_url: Option<String>,
}

/// Outbound calls the gateway makes to the platform.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Exchange an OAuth authorization code for an offline access token.
    async fn exchange_code(
        &self,
        shop: &ShopDomain,
        code: &str,
    ) -> Result<AccessToken, ShopifyError>;

    /// Fetch shop metadata using a freshly issued token.
    async fn shop_metadata(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
    ) -> Result<ShopMetadata, ShopifyError>;

    /// List existing webhook subscriptions for one topic.
    async fn list_webhook_subscriptions(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        topic: WebhookTopic,
    ) -> Result<Vec<WebhookSubscription>, ShopifyError>;

    /// Create a webhook subscription delivering `topic` to `callback_url`.
    async fn create_webhook_subscription(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        topic: WebhookTopic,
        callback_url: &str,
    ) -> Result<WebhookSubscription, ShopifyError>;
}

/// Mask a credential for logging: keep a short prefix, hide the rest.
#[must_use]
pub fn mask_secret(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}****")
}

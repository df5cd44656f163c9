//! reqwest-based Admin API client.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use shopgate_core::{ShopDomain, WebhookTopic};
use tracing::instrument;

use super::{
    AccessToken, GraphQLError, PlatformApi, ShopMetadata, ShopifyError, WebhookSubscription,
};
use crate::config::ShopifyConfig;

const SHOP_QUERY: &str = "query ShopMetadata { shop { id name } }";

const LIST_SUBSCRIPTIONS_QUERY: &str = r"
query WebhookSubscriptions($topics: [WebhookSubscriptionTopic!]) {
  webhookSubscriptions(first: 50, topics: $topics) {
    edges { node { id topic uri } }
  }
}";

const CREATE_SUBSCRIPTION_MUTATION: &str = r"
mutation WebhookSubscriptionCreate($topic: WebhookSubscriptionTopic!, $uri: String!) {
  webhookSubscriptionCreate(topic: $topic, webhookSubscription: { uri: $uri, format: JSON }) {
    webhookSubscription { id topic uri }
    userErrors { field message }
  }
}";

/// Longest error body kept from a failed platform response.
const MAX_ERROR_BODY: usize = 512;

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLErrorResponse>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorResponse {
    message: String,
    #[serde(default)]
    path: Vec<serde_json::Value>,
}

/// OAuth token response from the platform.
#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    scope: String,
}

#[derive(Debug, Deserialize)]
struct ShopData {
    shop: ShopNode,
}

#[derive(Debug, Deserialize)]
struct ShopNode {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionsData {
    webhook_subscriptions: SubscriptionConnection,
}

#[derive(Debug, Deserialize)]
struct SubscriptionConnection {
    edges: Vec<SubscriptionEdge>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionEdge {
    node: SubscriptionNode,
}

#[derive(Debug, Deserialize)]
struct SubscriptionNode {
    id: String,
    topic: String,
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionData {
    webhook_subscription_create: CreateSubscriptionPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionPayload {
    webhook_subscription: Option<SubscriptionNode>,
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct UserError {
    #[serde(default)]
    field: Option<Vec<String>>,
    message: String,
}

impl SubscriptionNode {
    /// Convert to the domain type, skipping topics this gateway does not know.
    fn into_subscription(self) -> Option<WebhookSubscription> {
        let topic = WebhookTopic::from_graphql_name(&self.topic)?;
        Some(WebhookSubscription {
            id: self.id,
            topic,
            callback_url: self.uri,
        })
    }
}

// =============================================================================
// Client
// =============================================================================

/// Admin API client for a multi-shop app.
///
/// Unlike a single-store client, every call names the shop and carries the
/// shop's own token; nothing is cached here.
#[derive(Clone)]
pub struct ShopifyClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    api_version: String,
}

impl std::fmt::Debug for ShopifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl ShopifyClient {
    /// Create a new client. Every outbound call is bounded by
    /// `config.request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ShopifyError::Http` if the HTTP client cannot be built.
    pub fn new(config: &ShopifyConfig) -> Result<Self, ShopifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            api_version: config.api_version.clone(),
        })
    }

    /// Execute a GraphQL operation against a shop's Admin API.
    async fn graphql<T: DeserializeOwned>(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, ShopifyError> {
        let endpoint = format!(
            "https://{}/admin/api/{}/graphql.json",
            shop, self.api_version
        );

        let response = self
            .client
            .post(&endpoint)
            .header("X-Shopify-Access-Token", token.expose_secret())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(2);
            return Err(ShopifyError::RateLimited(retry_after));
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ShopifyError::Unauthorized(format!(
                "{shop} rejected the access token"
            )));
        }

        if !status.is_success() {
            return Err(status_error(response).await);
        }

        let graphql_response: GraphQLResponse<T> = response.json().await?;

        if let Some(errors) = graphql_response.errors
            && !errors.is_empty()
        {
            return Err(ShopifyError::GraphQL(
                errors
                    .into_iter()
                    .map(|e| GraphQLError {
                        message: e.message,
                        path: e.path,
                    })
                    .collect(),
            ));
        }

        graphql_response.data.ok_or_else(|| {
            ShopifyError::GraphQL(vec![GraphQLError {
                message: "No data in response".to_string(),
                path: vec![],
            }])
        })
    }
}

async fn status_error(response: reqwest::Response) -> ShopifyError {
    let status = response.status().as_u16();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    ShopifyError::Status { status, body }
}

#[async_trait]
impl PlatformApi for ShopifyClient {
    #[instrument(skip(self, code), fields(shop = %shop))]
    async fn exchange_code(
        &self,
        shop: &ShopDomain,
        code: &str,
    ) -> Result<AccessToken, ShopifyError> {
        let url = format!("https://{shop}/admin/oauth/access_token");

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("code", code),
        ];

        let response = self.client.post(&url).form(&params).send().await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let token_response: OAuthTokenResponse = response.json().await?;

        Ok(AccessToken {
            access_token: SecretString::from(token_response.access_token),
            scopes: token_response
                .scope
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        })
    }

    #[instrument(skip(self, token), fields(shop = %shop))]
    async fn shop_metadata(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
    ) -> Result<ShopMetadata, ShopifyError> {
        let data: ShopData = self.graphql(shop, token, SHOP_QUERY, json!({})).await?;

        Ok(ShopMetadata {
            platform_shop_id: data.shop.id,
            name: data.shop.name,
        })
    }

    #[instrument(skip(self, token), fields(shop = %shop, topic = %topic))]
    async fn list_webhook_subscriptions(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        topic: WebhookTopic,
    ) -> Result<Vec<WebhookSubscription>, ShopifyError> {
        let data: SubscriptionsData = self
            .graphql(
                shop,
                token,
                LIST_SUBSCRIPTIONS_QUERY,
                json!({ "topics": [topic.graphql_name()] }),
            )
            .await?;

        Ok(data
            .webhook_subscriptions
            .edges
            .into_iter()
            .filter_map(|edge| edge.node.into_subscription())
            .collect())
    }

    #[instrument(skip(self, token), fields(shop = %shop, topic = %topic))]
    async fn create_webhook_subscription(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        topic: WebhookTopic,
        callback_url: &str,
    ) -> Result<WebhookSubscription, ShopifyError> {
        let data: CreateSubscriptionData = self
            .graphql(
                shop,
                token,
                CREATE_SUBSCRIPTION_MUTATION,
                json!({ "topic": topic.graphql_name(), "uri": callback_url }),
            )
            .await?;

        let payload = data.webhook_subscription_create;

        if let Some(error) = payload.user_errors.first() {
            let field = error
                .field
                .as_ref()
                .map(|f| f.join("."))
                .unwrap_or_default();
            return Err(ShopifyError::UserError(format!("{field}: {}", error.message)));
        }

        payload
            .webhook_subscription
            .and_then(SubscriptionNode::into_subscription)
            .ok_or_else(|| {
                ShopifyError::UserError("No webhook subscription returned".to_string())
            })
    }
}

/// Build the platform consent URL a merchant is sent to at install.
///
/// Always requests an offline token, which outlives the installing user's
/// browser session.
#[must_use]
pub fn authorization_url(
    config: &ShopifyConfig,
    shop: &ShopDomain,
    redirect_uri: &str,
    state: &str,
) -> String {
    let scope = config.scopes.join(",");
    format!(
        "https://{}/admin/oauth/authorize?client_id={}&scope={}&redirect_uri={}&state={}&grant_options[]=offline",
        shop,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&scope),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state)
    )
}

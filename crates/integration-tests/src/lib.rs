//! Integration tests for shopgate.
//!
//! The gateway router is driven in-process with `tower::ServiceExt::oneshot`
//! against memory-backed stores and a fake platform, so these tests need no
//! database or network.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p shopgate-integration-tests
//! ```

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode, header};
use shopgate_core::WebhookTopic;
use shopgate_gateway::app::build_router;
use shopgate_gateway::config::GatewayConfig;
use shopgate_gateway::db::JobQueue;
use shopgate_gateway::middleware::create_session_layer;
use shopgate_gateway::state::{AppState, Backends};
use shopgate_gateway::testing::{FakePlatform, sign_webhook, test_config};
use tower::ServiceExt;
use tower_sessions::MemoryStore;

pub use shopgate_gateway::testing;

/// A gateway router plus handles on its fakes.
pub struct TestApp {
    pub router: Router,
    pub platform: Arc<FakePlatform>,
    pub state: AppState,
}

impl TestApp {
    /// Default test configuration over fresh memory stores.
    #[must_use]
    pub fn new() -> Self {
        Self::with(test_config(), Backends::memory())
    }

    /// Memory stores, but jobs go to `queue`.
    #[must_use]
    pub fn with_queue(queue: Arc<dyn JobQueue>) -> Self {
        Self::with(
            test_config(),
            Backends {
                queue,
                ..Backends::memory()
            },
        )
    }

    /// Build over explicit configuration and stores.
    #[must_use]
    pub fn with(config: GatewayConfig, backends: Backends) -> Self {
        let platform = Arc::new(FakePlatform::new());
        let session_layer = create_session_layer(MemoryStore::default(), &config);
        let state = AppState::new(config, platform.clone(), backends);
        let router = build_router(state.clone(), session_layer);
        Self {
            router,
            platform,
            state,
        }
    }

    /// Send one request through the full middleware stack.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// `GET uri`.
    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Deliver a correctly signed webhook.
    pub async fn deliver(
        &self,
        topic: WebhookTopic,
        shop: &str,
        delivery_id: Option<&str>,
        body: &[u8],
    ) -> Response<Body> {
        self.deliver_signed(topic, shop, delivery_id, body, &sign_webhook(body))
            .await
    }

    /// Deliver a webhook with an explicit signature header.
    pub async fn deliver_signed(
        &self,
        topic: WebhookTopic,
        shop: &str,
        delivery_id: Option<&str>,
        body: &[u8],
        signature: &str,
    ) -> Response<Body> {
        self.send(webhook_request(topic, shop, delivery_id, body, signature))
            .await
    }
}

/// A webhook POST as the platform sends it.
#[must_use]
pub fn webhook_request(
    topic: WebhookTopic,
    shop: &str,
    delivery_id: Option<&str>,
    body: &[u8],
    signature: &str,
) -> Request<Body> {
    let mut request = Request::post(topic.path())
        .header("content-type", "application/json")
        .header("x-shopify-hmac-sha256", signature)
        .header("x-shopify-shop-domain", shop)
        .header("x-shopify-topic", topic.as_str())
        .header("x-shopify-api-version", "2026-01");
    if let Some(id) = delivery_id {
        request = request.header("x-shopify-webhook-id", id);
    }
    request.body(Body::from(body.to_vec())).unwrap()
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a JSON response body.
pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read a response body as text.
pub async fn text_body(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// The `Location` of a 302 response.
#[must_use]
pub fn redirect_location(response: &Response<Body>) -> String {
    assert_eq!(response.status(), StatusCode::FOUND);
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

//! HTTP route handlers for the gateway.
//!
//! # Route Structure
//!
//! ```text
//! GET  /install                       - Redirect to the platform consent screen
//! GET  /auth/callback                 - OAuth callback (token exchange, session)
//!
//! POST /webhooks/app/uninstalled      - App removed from a shop
//! POST /webhooks/shop/update          - Shop settings changed
//! POST /webhooks/products/update      - Product changed
//! POST /webhooks/inventory_levels/update
//! POST /webhooks/orders/create        - Order placed
//! POST /webhooks/customers/data_request  - Compliance
//! POST /webhooks/customers/redact        - Compliance
//! POST /webhooks/shop/redact             - Compliance
//! ```

pub mod install;
pub mod webhooks;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
};
use shopgate_core::WebhookTopic;

use crate::state::AppState;

/// Build the complete router with all routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(install_routes())
        .merge(webhook_routes())
}

/// OAuth install routes.
fn install_routes() -> Router<AppState> {
    Router::new()
        .route("/install", get(install::install))
        .route("/auth/callback", get(install::callback))
}

/// One POST route per accepted topic.
fn webhook_routes() -> Router<AppState> {
    WebhookTopic::ALL
        .into_iter()
        .fold(Router::new(), |router, topic| {
            router.route(
                &topic.path(),
                post(
                    move |State(state): State<AppState>, headers: HeaderMap, body: Bytes| async move {
                        webhooks::ingest(&state, topic, &headers, body).await
                    },
                ),
            )
        })
}

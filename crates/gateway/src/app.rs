//! Router assembly.
//!
//! Kept apart from `main` so tests can drive the full middleware stack
//! with `tower::ServiceExt::oneshot`.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware,
    routing::get,
};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tower_sessions::{SessionManagerLayer, SessionStore};
use tracing::Span;

use crate::middleware::request_id_middleware;
use crate::routes;
use crate::state::AppState;

/// Build the application router with health checks, routes, and middleware.
pub fn build_router<S>(state: AppState, session_layer: SessionManagerLayer<S>) -> Router
where
    S: SessionStore + Clone,
{
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(routes::routes())
        .layer(session_layer)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri().path(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// With `PostgreSQL` storage, verifies database connectivity and returns
/// 503 Service Unavailable if it is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    let Some(pool) = state.pool() else {
        return StatusCode::OK;
    };

    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use tower::ServiceExt;
    use tower_sessions::MemoryStore;

    use super::*;
    use crate::middleware::create_session_layer;
    use crate::state::Backends;
    use crate::testing::{FakePlatform, sign_webhook, test_config};

    fn app() -> Router {
        let config = test_config();
        let session_layer = create_session_layer(MemoryStore::default(), &config);
        let state = AppState::new(config, Arc::new(FakePlatform::new()), Backends::memory());
        build_router(state, session_layer)
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_without_database() {
        let response = app()
            .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_install_redirects() {
        let response = app()
            .oneshot(
                Request::get("/install?shop=acme&host=YWRtaW4")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://acme.myshopify.com/admin/oauth/authorize?"));
    }

    #[tokio::test]
    async fn test_install_without_shop_renders_error_page() {
        let response = app()
            .oneshot(Request::get("/install").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("<html"));
    }

    #[tokio::test]
    async fn test_every_topic_is_routed() {
        let app = app();
        let body = br#"{"id":1}"#;

        for topic in shopgate_core::WebhookTopic::ALL
            .into_iter()
            .filter(|t| !t.is_compliance())
        {
            let response = app
                .clone()
                .oneshot(
                    Request::post(topic.path())
                        .header("x-shopify-hmac-sha256", sign_webhook(body))
                        .header("x-shopify-shop-domain", "acme.myshopify.com")
                        .header("x-shopify-topic", topic.as_str())
                        .body(Body::from(body.to_vec()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "topic {topic}");
        }
    }

    #[tokio::test]
    async fn test_unknown_topic_not_found() {
        let response = app()
            .oneshot(
                Request::post("/webhooks/carts/create")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_echoes_request_id() {
        let response = app()
            .oneshot(
                Request::get("/health")
                    .header("x-request-id", "req-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "req-123");
    }
}

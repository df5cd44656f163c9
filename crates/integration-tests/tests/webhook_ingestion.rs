//! Integration tests for webhook verification, dedup, and hand-off.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use secrecy::SecretString;
use serde_json::json;
use shopgate_core::{ShopDomain, WebhookTopic};
use shopgate_gateway::db::NewStoreCredential;
use shopgate_gateway::db::memory::MemoryJobQueue;
use shopgate_gateway::services::BreakerState;
use shopgate_gateway::state::Backends;
use shopgate_integration_tests::testing::{
    FlakyQueue, UnavailableIdempotencyStore, sign_webhook, test_config,
};
use shopgate_integration_tests::{TestApp, json_body, webhook_request};
use tokio::task::JoinSet;
use tower::ServiceExt;

const SHOP: &str = "acme.myshopify.com";
const ORDER: &[u8] = br#"{"id":450789469,"total_price":"409.94","currency":"USD"}"#;

async fn install_credential(app: &TestApp, shop: &str) {
    app.state
        .credentials()
        .upsert(NewStoreCredential {
            shop: ShopDomain::parse(shop).unwrap(),
            access_token: SecretString::from("shpat_test"),
            scopes: vec!["read_orders".to_string()],
            platform_shop_id: None,
            shop_name: None,
        })
        .await
        .unwrap();
}

// =============================================================================
// Dedup
// =============================================================================

#[tokio::test]
async fn test_duplicate_delivery_enqueued_once() {
    let queue = Arc::new(MemoryJobQueue::new());
    let app = TestApp::with_queue(queue.clone());

    let first = app
        .deliver(WebhookTopic::OrdersCreate, SHOP, Some("b1f9e0c2-0001"), ORDER)
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(json_body(first).await, json!({ "status": "queued" }));

    let second = app
        .deliver(WebhookTopic::OrdersCreate, SHOP, Some("b1f9e0c2-0001"), ORDER)
        .await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(json_body(second).await, json!({ "status": "ignored_duplicate" }));

    let jobs = queue.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].topic, WebhookTopic::OrdersCreate);
    assert_eq!(jobs[0].shop.as_str(), SHOP);
    assert_eq!(jobs[0].api_version.as_deref(), Some("2026-01"));
    assert_eq!(jobs[0].payload.as_ref(), ORDER);
}

#[tokio::test]
async fn test_concurrent_deliveries_enqueue_once() {
    let queue = Arc::new(MemoryJobQueue::new());
    let app = TestApp::with_queue(queue.clone());
    let signature = sign_webhook(ORDER);

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let router = app.router.clone();
        let request = webhook_request(
            WebhookTopic::OrdersCreate,
            SHOP,
            Some("b1f9e0c2-0002"),
            ORDER,
            &signature,
        );
        tasks.spawn(async move { router.oneshot(request).await.unwrap().status() });
    }

    while let Some(status) = tasks.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }
    assert_eq!(queue.jobs().await.len(), 1);
}

#[tokio::test]
async fn test_delivery_processed_again_after_window() {
    let mut config = test_config();
    config.webhooks.idempotency_ttl = Duration::from_millis(100);
    let queue = Arc::new(MemoryJobQueue::new());
    let app = TestApp::with(
        config,
        Backends {
            queue: queue.clone(),
            ..Backends::memory()
        },
    );

    let first = app
        .deliver(WebhookTopic::ProductsUpdate, SHOP, Some("b1f9e0c2-0003"), ORDER)
        .await;
    assert_eq!(json_body(first).await["status"], "queued");

    tokio::time::sleep(Duration::from_millis(250)).await;

    let second = app
        .deliver(WebhookTopic::ProductsUpdate, SHOP, Some("b1f9e0c2-0003"), ORDER)
        .await;
    assert_eq!(json_body(second).await["status"], "queued");
    assert_eq!(queue.jobs().await.len(), 2);
}

#[tokio::test]
async fn test_dedup_store_outage_fails_open() {
    let queue = Arc::new(MemoryJobQueue::new());
    let app = TestApp::with(
        test_config(),
        Backends {
            idempotency: Arc::new(UnavailableIdempotencyStore),
            queue: queue.clone(),
            ..Backends::memory()
        },
    );

    // Threshold is 3 in the test config; the 4th and 5th skip the store.
    for _ in 0..5 {
        let response = app
            .deliver(WebhookTopic::OrdersCreate, SHOP, Some("b1f9e0c2-0004"), ORDER)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "queued");
    }

    assert_eq!(queue.jobs().await.len(), 5);
    assert_eq!(app.state.guard().breaker().state(), BreakerState::Open);
}

#[tokio::test]
async fn test_enqueue_failure_allows_redelivery() {
    let queue = Arc::new(FlakyQueue::new(1));
    let app = TestApp::with_queue(queue.clone());

    let first = app
        .deliver(WebhookTopic::OrdersCreate, SHOP, Some("b1f9e0c2-0005"), ORDER)
        .await;
    assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let retry = app
        .deliver(WebhookTopic::OrdersCreate, SHOP, Some("b1f9e0c2-0005"), ORDER)
        .await;
    assert_eq!(retry.status(), StatusCode::OK);
    assert_eq!(json_body(retry).await["status"], "queued");
    assert_eq!(queue.jobs().await.len(), 1);
}

// =============================================================================
// Verification
// =============================================================================

#[tokio::test]
async fn test_flipped_byte_rejected() {
    let queue = Arc::new(MemoryJobQueue::new());
    let app = TestApp::with_queue(queue.clone());
    let signature = sign_webhook(ORDER);

    let mut tampered = ORDER.to_vec();
    tampered[10] ^= 0x01;

    let response = app
        .deliver_signed(
            WebhookTopic::OrdersCreate,
            SHOP,
            Some("b1f9e0c2-0006"),
            &tampered,
            &signature,
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(queue.jobs().await.is_empty());
}

#[tokio::test]
async fn test_rejected_delivery_does_not_consume_id() {
    let app = TestApp::new();

    let forged = app
        .deliver_signed(
            WebhookTopic::OrdersCreate,
            SHOP,
            Some("b1f9e0c2-0007"),
            ORDER,
            "bm90IGEgc2lnbmF0dXJl",
        )
        .await;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

    let genuine = app
        .deliver(WebhookTopic::OrdersCreate, SHOP, Some("b1f9e0c2-0007"), ORDER)
        .await;
    assert_eq!(json_body(genuine).await["status"], "queued");
}

#[tokio::test]
async fn test_shop_header_normalized() {
    let queue = Arc::new(MemoryJobQueue::new());
    let app = TestApp::with_queue(queue.clone());

    let response = app
        .deliver(WebhookTopic::ShopUpdate, "ACME.myshopify.com", None, ORDER)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(queue.jobs().await[0].shop.as_str(), SHOP);
}

#[tokio::test]
async fn test_malformed_shop_header() {
    let app = TestApp::new();

    let response = app
        .deliver(WebhookTopic::ShopUpdate, "not a shop", None, ORDER)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_parameter");
}

// =============================================================================
// Compliance topics
// =============================================================================

#[tokio::test]
async fn test_compliance_for_unknown_store() {
    let app = TestApp::new();
    let body = br#"{"shop_id":954889,"shop_domain":"ghost.myshopify.com"}"#;

    let response = app
        .deliver(
            WebhookTopic::ShopRedact,
            "ghost.myshopify.com",
            Some("b1f9e0c2-0008"),
            body,
        )
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "store_not_found");
}

#[tokio::test]
async fn test_compliance_for_installed_store() {
    let queue = Arc::new(MemoryJobQueue::new());
    let app = TestApp::with_queue(queue.clone());
    install_credential(&app, SHOP).await;
    let body = br#"{"shop_id":954889,"customer":{"id":191167},"orders_requested":[299938]}"#;

    let response = app
        .deliver(
            WebhookTopic::CustomersDataRequest,
            SHOP,
            Some("b1f9e0c2-0009"),
            body,
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(queue.jobs().await[0].topic, WebhookTopic::CustomersDataRequest);
}

#[tokio::test]
async fn test_compliance_for_store_named_www() {
    let queue = Arc::new(MemoryJobQueue::new());
    let app = TestApp::with_queue(queue.clone());
    let installed = ShopDomain::normalize("www").unwrap();
    install_credential(&app, installed.as_str()).await;
    let body = br#"{"shop_id":954890,"shop_domain":"www.myshopify.com"}"#;

    let response = app
        .deliver(
            WebhookTopic::ShopRedact,
            "www.myshopify.com",
            Some("b1f9e0c2-0010"),
            body,
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(queue.jobs().await[0].shop, installed);
}

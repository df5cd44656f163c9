//! Webhook ingestion.
//!
//! Every topic has its own route, but all share one pipeline:
//! verify the raw body, identify the shop, dedup the delivery, and hand the
//! job off to the background worker. Nothing here does business processing;
//! the platform only needs a fast 2xx.

use axum::{Json, body::Bytes, http::HeaderMap};
use secrecy::ExposeSecret;
use serde::Serialize;
use shopgate_core::{DeliveryId, ShopDomain, WebhookTopic};
use tracing::{Span, info, instrument, warn};

use crate::db::WebhookJob;
use crate::error::{AppError, Result};
use crate::services::GuardDecision;
use crate::shopify::hmac::verify_webhook_hmac;
use crate::state::AppState;

/// Base64 HMAC-SHA256 of the raw body.
pub const HMAC_HEADER: &str = "x-shopify-hmac-sha256";
/// Canonical domain of the shop the delivery concerns.
pub const SHOP_DOMAIN_HEADER: &str = "x-shopify-shop-domain";
/// Topic the platform believes it is delivering.
pub const TOPIC_HEADER: &str = "x-shopify-topic";
/// Unique delivery id, stable across retries.
pub const WEBHOOK_ID_HEADER: &str = "x-shopify-webhook-id";
/// Admin API version the payload was rendered with.
pub const API_VERSION_HEADER: &str = "x-shopify-api-version";

/// Acknowledgement body for accepted deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookAck {
    /// Handed off to the worker.
    Queued,
    /// Already seen within the dedup window.
    IgnoredDuplicate,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Ingest one delivery for `topic`.
///
/// Responds 401 on a bad signature, 400 when the shop header is unusable,
/// 404 for compliance topics about unknown shops, and 500 only when the job
/// could not be enqueued, so the platform redelivers.
#[instrument(
    skip(state, headers, body),
    fields(topic = %topic, shop = tracing::field::Empty, delivery_id = tracing::field::Empty)
)]
pub async fn ingest(
    state: &AppState,
    topic: WebhookTopic,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let config = state.config();

    let signature = header(headers, HMAC_HEADER).ok_or(AppError::SignatureInvalid)?;
    let secret = config.shopify.client_secret.expose_secret().as_bytes();
    if !verify_webhook_hmac(&body, signature, secret) {
        warn!(body_len = body.len(), "Webhook signature mismatch");
        return Err(AppError::SignatureInvalid);
    }

    let raw_shop =
        header(headers, SHOP_DOMAIN_HEADER).ok_or(AppError::MissingParameter(SHOP_DOMAIN_HEADER))?;
    let shop = ShopDomain::normalize_with_suffix(raw_shop, &config.shopify.shop_suffix)
        .map_err(|e| AppError::InvalidParameter(format!("{SHOP_DOMAIN_HEADER}: {e}")))?;
    Span::current().record("shop", shop.as_str());

    if let Some(sent_topic) = header(headers, TOPIC_HEADER)
        && sent_topic != topic.as_str()
    {
        warn!(header_topic = sent_topic, "Topic header does not match route");
    }

    if topic.is_compliance() {
        match state.credentials().get_by_shop(&shop).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(AppError::StoreNotFound(shop)),
            // Unknown is not absent; let the worker decide.
            Err(e) => warn!(error = %e, "Credential lookup failed for compliance webhook"),
        }
    }

    let delivery_id = header(headers, WEBHOOK_ID_HEADER).and_then(|raw| {
        DeliveryId::parse(raw)
            .inspect_err(|e| warn!(error = %e, "Ignoring malformed delivery id"))
            .ok()
    });
    if let Some(id) = &delivery_id {
        Span::current().record("delivery_id", id.as_str());
    }

    let decision = state.guard().check(delivery_id.as_ref()).await;
    if !decision.should_process() {
        info!("Duplicate delivery ignored");
        return Ok(Json(WebhookAck::IgnoredDuplicate));
    }

    let job = WebhookJob {
        topic,
        shop,
        delivery_id,
        api_version: header(headers, API_VERSION_HEADER).map(String::from),
        payload: body,
    };

    match state.queue().enqueue(job).await {
        Ok(job_id) => {
            info!(job_id = %job_id, ?decision, "Webhook queued");
            Ok(Json(WebhookAck::Queued))
        }
        Err(e) => {
            if let GuardDecision::Fresh(id) = &decision {
                state.guard().release(id).await;
            }
            Err(AppError::QueueUnavailable(e))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::http::HeaderValue;

    use super::*;
    use crate::db::{NewStoreCredential, memory::MemoryJobQueue};
    use crate::state::Backends;
    use crate::testing::{FailingQueue, FakePlatform, sign_webhook, test_config};

    const BODY: &[u8] = br#"{"id":820982911946154508,"email":"jon@example.com"}"#;

    fn state_with(backends: Backends) -> AppState {
        AppState::new(test_config(), Arc::new(FakePlatform::new()), backends)
    }

    fn signed_headers(body: &[u8], shop: &str, delivery: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HMAC_HEADER, HeaderValue::from_str(&sign_webhook(body)).unwrap());
        headers.insert(SHOP_DOMAIN_HEADER, HeaderValue::from_str(shop).unwrap());
        if let Some(id) = delivery {
            headers.insert(WEBHOOK_ID_HEADER, HeaderValue::from_str(id).unwrap());
        }
        headers
    }

    #[tokio::test]
    async fn test_queues_then_ignores_duplicate() {
        let queue = Arc::new(MemoryJobQueue::new());
        let state = state_with(Backends {
            queue: queue.clone(),
            ..Backends::memory()
        });
        let headers = signed_headers(BODY, "acme.myshopify.com", Some("d-1"));

        let first = ingest(&state, WebhookTopic::OrdersCreate, &headers, Bytes::from_static(BODY))
            .await
            .unwrap();
        let second = ingest(&state, WebhookTopic::OrdersCreate, &headers, Bytes::from_static(BODY))
            .await
            .unwrap();

        assert_eq!(first.0, WebhookAck::Queued);
        assert_eq!(second.0, WebhookAck::IgnoredDuplicate);
        let jobs = queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].payload.as_ref(), BODY);
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let state = state_with(Backends::memory());
        let headers = signed_headers(BODY, "acme.myshopify.com", Some("d-2"));
        let tampered = br#"{"id":820982911946154509,"email":"jon@example.com"}"#;

        let err = ingest(&state, WebhookTopic::OrdersCreate, &headers, Bytes::from_static(tampered))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SignatureInvalid));
    }

    #[tokio::test]
    async fn test_rejects_missing_signature() {
        let state = state_with(Backends::memory());
        let mut headers = signed_headers(BODY, "acme.myshopify.com", None);
        headers.remove(HMAC_HEADER);

        let err = ingest(&state, WebhookTopic::OrdersCreate, &headers, Bytes::from_static(BODY))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SignatureInvalid));
    }

    #[tokio::test]
    async fn test_requires_shop_header() {
        let state = state_with(Backends::memory());
        let mut headers = signed_headers(BODY, "acme.myshopify.com", None);
        headers.remove(SHOP_DOMAIN_HEADER);

        let err = ingest(&state, WebhookTopic::OrdersCreate, &headers, Bytes::from_static(BODY))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingParameter(SHOP_DOMAIN_HEADER)));
    }

    #[tokio::test]
    async fn test_compliance_for_unknown_store() {
        let state = state_with(Backends::memory());
        let headers = signed_headers(BODY, "ghost.myshopify.com", Some("d-3"));

        let err = ingest(&state, WebhookTopic::CustomersRedact, &headers, Bytes::from_static(BODY))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreNotFound(_)));
    }

    #[tokio::test]
    async fn test_compliance_for_known_store() {
        let backends = Backends::memory();
        backends
            .credentials
            .upsert(NewStoreCredential {
                shop: ShopDomain::parse("acme.myshopify.com").unwrap(),
                access_token: secrecy::SecretString::from("shpat_abc"),
                scopes: vec![],
                platform_shop_id: None,
                shop_name: None,
            })
            .await
            .unwrap();
        let state = state_with(backends);
        let headers = signed_headers(BODY, "acme.myshopify.com", Some("d-4"));

        let ack = ingest(&state, WebhookTopic::ShopRedact, &headers, Bytes::from_static(BODY))
            .await
            .unwrap();
        assert_eq!(ack.0, WebhookAck::Queued);
    }

    #[tokio::test]
    async fn test_enqueue_failure_releases_delivery() {
        let backends = Backends::memory();
        let idempotency = backends.idempotency.clone();
        let state = state_with(Backends {
            queue: Arc::new(FailingQueue),
            ..backends
        });
        let headers = signed_headers(BODY, "acme.myshopify.com", Some("d-5"));

        let err = ingest(&state, WebhookTopic::OrdersCreate, &headers, Bytes::from_static(BODY))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QueueUnavailable(_)));

        // The record was released, so a redelivery is fresh again.
        let id = DeliveryId::parse("d-5").unwrap();
        let again = idempotency
            .check_and_set(&id, std::time::Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(again, crate::db::CheckAndSet::Fresh);
    }

    #[tokio::test]
    async fn test_missing_delivery_id_is_processed() {
        let queue = Arc::new(MemoryJobQueue::new());
        let state = state_with(Backends {
            queue: queue.clone(),
            ..Backends::memory()
        });
        let headers = signed_headers(BODY, "acme", None);

        for _ in 0..2 {
            let ack = ingest(&state, WebhookTopic::ProductsUpdate, &headers, Bytes::from_static(BODY))
                .await
                .unwrap();
            assert_eq!(ack.0, WebhookAck::Queued);
        }
        let jobs = queue.jobs().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].shop.as_str(), "acme.myshopify.com");
    }
}

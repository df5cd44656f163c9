//! Test support: a fake platform, failing stores, and signing helpers.
//!
//! Compiled for this crate's unit tests and, with the `test-util` feature,
//! for the integration-tests crate.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use shopgate_core::{DeliveryId, ShopDomain, WebhookJobId, WebhookTopic};

use crate::config::{
    GatewayConfig, InstallConfig, ShopifyConfig, StorageBackend, WebhookConfig,
};
use crate::db::memory::MemoryJobQueue;
use crate::db::{CheckAndSet, IdempotencyError, IdempotencyStore, JobQueue, QueueError, WebhookJob};
use crate::services::installation::CallbackParams;
use crate::shopify::hmac::{compute_query_hmac, compute_webhook_hmac};
use crate::shopify::{AccessToken, PlatformApi, ShopMetadata, ShopifyError, WebhookSubscription};

/// Client secret used by [`test_config`].
pub const TEST_CLIENT_SECRET: &str = "test_client_secret_9f8e7d6c5b4a";

/// Public base URL used by [`test_config`].
pub const TEST_BASE_URL: &str = "https://gateway.test";

/// A configuration suitable for tests: memory storage, short timeouts.
#[must_use]
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        storage: StorageBackend::Memory,
        database_url: None,
        host: IpAddr::from([127, 0, 0, 1]),
        port: 3000,
        base_url: TEST_BASE_URL.to_string(),
        shopify: ShopifyConfig {
            client_id: "test-client-id".to_string(),
            client_secret: SecretString::from(TEST_CLIENT_SECRET),
            api_version: "2026-01".to_string(),
            scopes: vec!["read_products".to_string(), "read_orders".to_string()],
            shop_suffix: ShopDomain::DEFAULT_SUFFIX.to_string(),
            request_timeout: Duration::from_secs(2),
        },
        install: InstallConfig {
            dashboard_url: format!("{TEST_BASE_URL}/dashboard"),
            trial_days: 14,
            interstitial_max_attempts: 3,
        },
        webhooks: WebhookConfig {
            idempotency_ttl: Duration::from_secs(86_400),
            idempotency_timeout: Duration::from_millis(200),
            breaker_failure_threshold: 3,
            breaker_cooldown: Duration::from_secs(30),
        },
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 1.0,
        sentry_traces_sample_rate: 1.0,
        tls: None,
    }
}

/// Append a valid `hmac` to the given callback parameters.
#[must_use]
pub fn signed_callback(pairs: &[(&str, &str)]) -> CallbackParams {
    let signature = compute_query_hmac(pairs.iter().copied(), TEST_CLIENT_SECRET.as_bytes());
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .chain(std::iter::once(("hmac".to_string(), signature)))
        .collect()
}

/// Build a signed callback query string, percent-encoding each value.
#[must_use]
pub fn signed_callback_query(pairs: &[(&str, &str)]) -> String {
    let signature = compute_query_hmac(pairs.iter().copied(), TEST_CLIENT_SECRET.as_bytes());
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        serializer.append_pair(k, v);
    }
    serializer.append_pair("hmac", &signature);
    serializer.finish()
}

/// The webhook signature header value for `body` under [`TEST_CLIENT_SECRET`].
#[must_use]
pub fn sign_webhook(body: &[u8]) -> String {
    compute_webhook_hmac(body, TEST_CLIENT_SECRET.as_bytes())
}

// =============================================================================
// Fake platform
// =============================================================================

#[derive(Debug, Default)]
struct FakePlatformState {
    subscriptions: HashMap<ShopDomain, Vec<WebhookSubscription>>,
    fail_create: HashSet<WebhookTopic>,
    fail_exchange: bool,
    fail_metadata: bool,
    next_id: u64,
    exchanged_codes: Vec<String>,
}

/// In-memory stand-in for the platform's OAuth and Admin APIs.
#[derive(Debug, Default)]
pub struct FakePlatform {
    state: Mutex<FakePlatformState>,
}

impl FakePlatform {
    /// Create a fake with no subscriptions and no failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The token the fake issues for `code`.
    #[must_use]
    pub fn token_for(code: &str) -> String {
        format!("shpat_{code}")
    }

    /// Make every token exchange fail.
    pub fn fail_token_exchange(&self) {
        self.state.lock().unwrap().fail_exchange = true;
    }

    /// Make shop metadata lookups fail.
    pub fn fail_shop_metadata(&self) {
        self.state.lock().unwrap().fail_metadata = true;
    }

    /// Make subscription creation fail for `topic`.
    pub fn fail_create_for(&self, topic: WebhookTopic) {
        self.state.lock().unwrap().fail_create.insert(topic);
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_create.clear();
        state.fail_exchange = false;
        state.fail_metadata = false;
    }

    /// Seed an existing subscription.
    pub fn add_subscription(&self, shop: &ShopDomain, topic: WebhookTopic, callback_url: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("gid://shopify/WebhookSubscription/{}", state.next_id);
        state
            .subscriptions
            .entry(shop.clone())
            .or_default()
            .push(WebhookSubscription {
                id,
                topic,
                callback_url: Some(callback_url.to_string()),
            });
    }

    /// Subscriptions registered for `shop`.
    #[must_use]
    pub fn subscriptions(&self, shop: &ShopDomain) -> Vec<WebhookSubscription> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .get(shop)
            .cloned()
            .unwrap_or_default()
    }

    /// Codes exchanged so far.
    #[must_use]
    pub fn exchanged_codes(&self) -> Vec<String> {
        self.state.lock().unwrap().exchanged_codes.clone()
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn exchange_code(
        &self,
        _shop: &ShopDomain,
        code: &str,
    ) -> Result<AccessToken, ShopifyError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_exchange {
            return Err(ShopifyError::Status {
                status: 400,
                body: "invalid_request".to_string(),
            });
        }
        state.exchanged_codes.push(code.to_string());
        Ok(AccessToken {
            access_token: SecretString::from(Self::token_for(code)),
            scopes: vec!["read_products".to_string()],
        })
    }

    async fn shop_metadata(
        &self,
        shop: &ShopDomain,
        _token: &SecretString,
    ) -> Result<ShopMetadata, ShopifyError> {
        if self.state.lock().unwrap().fail_metadata {
            return Err(ShopifyError::Unauthorized("metadata unavailable".to_string()));
        }
        Ok(ShopMetadata {
            platform_shop_id: "gid://shopify/Shop/1".to_string(),
            name: shop.handle().to_string(),
        })
    }

    async fn list_webhook_subscriptions(
        &self,
        shop: &ShopDomain,
        _token: &SecretString,
        topic: WebhookTopic,
    ) -> Result<Vec<WebhookSubscription>, ShopifyError> {
        Ok(self
            .subscriptions(shop)
            .into_iter()
            .filter(|s| s.topic == topic)
            .collect())
    }

    async fn create_webhook_subscription(
        &self,
        shop: &ShopDomain,
        _token: &SecretString,
        topic: WebhookTopic,
        callback_url: &str,
    ) -> Result<WebhookSubscription, ShopifyError> {
        if self.state.lock().unwrap().fail_create.contains(&topic) {
            return Err(ShopifyError::UserError(format!(
                "webhookSubscription.uri: cannot subscribe to {topic}"
            )));
        }
        self.add_subscription(shop, topic, callback_url);
        self.subscriptions(shop)
            .into_iter()
            .next_back()
            .ok_or_else(|| ShopifyError::UserError("not stored".to_string()))
    }
}

// =============================================================================
// Failing stores
// =============================================================================

/// Dedup store whose every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableIdempotencyStore;

#[async_trait]
impl IdempotencyStore for UnavailableIdempotencyStore {
    async fn check_and_set(
        &self,
        _delivery: &DeliveryId,
        _ttl: Duration,
    ) -> Result<CheckAndSet, IdempotencyError> {
        Err(IdempotencyError::Unavailable("connection refused".to_string()))
    }

    async fn release(&self, _delivery: &DeliveryId) -> Result<(), IdempotencyError> {
        Err(IdempotencyError::Unavailable("connection refused".to_string()))
    }

    async fn purge_expired(&self) -> Result<u64, IdempotencyError> {
        Err(IdempotencyError::Unavailable("connection refused".to_string()))
    }
}

/// Dedup store that answers `Fresh` after a delay.
#[derive(Debug, Clone, Copy)]
pub struct SlowIdempotencyStore {
    delay: Duration,
}

impl SlowIdempotencyStore {
    /// Create a store that sleeps `delay` before each answer.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl IdempotencyStore for SlowIdempotencyStore {
    async fn check_and_set(
        &self,
        _delivery: &DeliveryId,
        _ttl: Duration,
    ) -> Result<CheckAndSet, IdempotencyError> {
        tokio::time::sleep(self.delay).await;
        Ok(CheckAndSet::Fresh)
    }

    async fn release(&self, _delivery: &DeliveryId) -> Result<(), IdempotencyError> {
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, IdempotencyError> {
        Ok(0)
    }
}

/// Job queue whose every enqueue fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingQueue;

#[async_trait]
impl JobQueue for FailingQueue {
    async fn enqueue(&self, _job: WebhookJob) -> Result<WebhookJobId, QueueError> {
        Err(QueueError::Unavailable("queue is down".to_string()))
    }
}

/// Job queue that fails a fixed number of enqueues, then recovers.
#[derive(Debug)]
pub struct FlakyQueue {
    remaining_failures: AtomicUsize,
    inner: MemoryJobQueue,
}

impl FlakyQueue {
    /// Fail the next `failures` enqueues.
    #[must_use]
    pub fn new(failures: usize) -> Self {
        Self {
            remaining_failures: AtomicUsize::new(failures),
            inner: MemoryJobQueue::new(),
        }
    }

    /// Jobs accepted after recovery.
    pub async fn jobs(&self) -> Vec<WebhookJob> {
        self.inner.jobs().await
    }
}

#[async_trait]
impl JobQueue for FlakyQueue {
    async fn enqueue(&self, job: WebhookJob) -> Result<WebhookJobId, QueueError> {
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::Unavailable("queue is down".to_string()));
        }
        self.inner.enqueue(job).await
    }
}

//! Mandatory webhook subscription reconciliation.
//!
//! After install, every topic in [`WebhookTopic::MANDATORY`] must have a
//! subscription pointing at this gateway. Reconciliation is idempotent:
//! topics already subscribed to the right address are left alone, and a
//! failure on one topic does not stop the others.
//!
//! Concurrent reconciliations for the same shop are serialized so two
//! installs racing each other cannot both observe "missing" and create
//! duplicate subscriptions.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use secrecy::SecretString;
use shopgate_core::{ShopDomain, WebhookTopic};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::shopify::PlatformApi;

/// How long an idle per-shop lock is kept.
const SHOP_LOCK_IDLE: Duration = Duration::from_secs(300);

/// Result of reconciling a single topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicOutcome {
    /// A subscription to the expected address already existed.
    AlreadyRegistered,
    /// A subscription was created.
    Created,
    /// Listing or creating failed; the message describes why.
    Failed(String),
}

/// Per-topic results of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    /// One entry per mandatory topic, in [`WebhookTopic::MANDATORY`] order.
    pub outcomes: Vec<(WebhookTopic, TopicOutcome)>,
}

impl RegistrationReport {
    /// Topics that could not be reconciled.
    pub fn failures(&self) -> impl Iterator<Item = WebhookTopic> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, TopicOutcome::Failed(_)))
            .map(|(topic, _)| *topic)
    }

    /// Whether every mandatory topic is subscribed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Number of subscriptions created by this reconciliation.
    #[must_use]
    pub fn created(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == TopicOutcome::Created)
            .count()
    }
}

/// Ensures mandatory webhook subscriptions exist for a shop.
#[derive(Clone)]
pub struct ComplianceWebhookRegistrar {
    platform: Arc<dyn PlatformApi>,
    base_url: String,
    shop_locks: Cache<ShopDomain, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for ComplianceWebhookRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComplianceWebhookRegistrar")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ComplianceWebhookRegistrar {
    /// Create a registrar that subscribes topics to `{base_url}/webhooks/...`.
    #[must_use]
    pub fn new(platform: Arc<dyn PlatformApi>, base_url: impl Into<String>) -> Self {
        let shop_locks = Cache::builder().time_to_idle(SHOP_LOCK_IDLE).build();
        Self {
            platform,
            base_url: base_url.into(),
            shop_locks,
        }
    }

    /// The address a subscription for `topic` must deliver to.
    #[must_use]
    pub fn callback_url(&self, topic: WebhookTopic) -> String {
        format!("{}{}", self.base_url, topic.path())
    }

    /// Reconcile every mandatory topic for `shop`.
    #[instrument(skip(self, token), fields(shop = %shop))]
    pub async fn reconcile(&self, shop: &ShopDomain, token: &SecretString) -> RegistrationReport {
        let lock = self
            .shop_locks
            .get_with(shop.clone(), async { Arc::new(Mutex::new(())) })
            .await;
        let _guard = lock.lock().await;

        let mut report = RegistrationReport::default();
        for topic in WebhookTopic::MANDATORY {
            let outcome = self.reconcile_topic(shop, token, topic).await;
            if let TopicOutcome::Failed(reason) = &outcome {
                warn!(topic = %topic, reason = %reason, "Mandatory webhook registration failed");
            }
            report.outcomes.push((topic, outcome));
        }

        info!(
            created = report.created(),
            failed = report.failures().count(),
            "Mandatory webhooks reconciled"
        );
        report
    }

    async fn reconcile_topic(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        topic: WebhookTopic,
    ) -> TopicOutcome {
        let expected = self.callback_url(topic);

        let existing = match self
            .platform
            .list_webhook_subscriptions(shop, token, topic)
            .await
        {
            Ok(existing) => existing,
            Err(e) => return TopicOutcome::Failed(format!("list: {e}")),
        };

        if existing
            .iter()
            .any(|s| s.topic == topic && s.callback_url.as_deref() == Some(expected.as_str()))
        {
            return TopicOutcome::AlreadyRegistered;
        }

        match self
            .platform
            .create_webhook_subscription(shop, token, topic, &expected)
            .await
        {
            Ok(_) => TopicOutcome::Created,
            Err(e) => TopicOutcome::Failed(format!("create: {e}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;

    fn shop() -> ShopDomain {
        ShopDomain::parse("acme.myshopify.com").unwrap()
    }

    fn token() -> SecretString {
        SecretString::from("shpat_test")
    }

    #[test]
    fn test_callback_url_targets_topic_route() {
        let registrar =
            ComplianceWebhookRegistrar::new(Arc::new(FakePlatform::new()), "https://gateway.test");
        assert_eq!(
            registrar.callback_url(WebhookTopic::ShopRedact),
            "https://gateway.test/webhooks/shop/redact"
        );
    }

    #[tokio::test]
    async fn test_creates_all_missing_topics() {
        let platform = Arc::new(FakePlatform::new());
        let registrar = ComplianceWebhookRegistrar::new(platform.clone(), "https://gateway.test");

        let report = registrar.reconcile(&shop(), &token()).await;
        assert!(report.is_complete());
        assert_eq!(report.created(), WebhookTopic::MANDATORY.len());
        assert_eq!(platform.subscriptions(&shop()).len(), 4);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let platform = Arc::new(FakePlatform::new());
        let registrar = ComplianceWebhookRegistrar::new(platform.clone(), "https://gateway.test");

        registrar.reconcile(&shop(), &token()).await;
        let report = registrar.reconcile(&shop(), &token()).await;

        assert_eq!(report.created(), 0);
        assert!(
            report
                .outcomes
                .iter()
                .all(|(_, o)| *o == TopicOutcome::AlreadyRegistered)
        );
        assert_eq!(platform.subscriptions(&shop()).len(), 4);
    }

    #[tokio::test]
    async fn test_subscription_to_other_address_is_not_reused() {
        let platform = Arc::new(FakePlatform::new());
        platform.add_subscription(
            &shop(),
            WebhookTopic::ShopRedact,
            "https://old-gateway.test/webhooks/shop/redact",
        );
        let registrar = ComplianceWebhookRegistrar::new(platform.clone(), "https://gateway.test");

        let report = registrar.reconcile(&shop(), &token()).await;
        assert!(report.outcomes.contains(&(WebhookTopic::ShopRedact, TopicOutcome::Created)));
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_topic() {
        let platform = Arc::new(FakePlatform::new());
        platform.fail_create_for(WebhookTopic::CustomersRedact);
        let registrar = ComplianceWebhookRegistrar::new(platform.clone(), "https://gateway.test");

        let report = registrar.reconcile(&shop(), &token()).await;
        assert!(!report.is_complete());
        assert_eq!(
            report.failures().collect::<Vec<_>>(),
            vec![WebhookTopic::CustomersRedact]
        );
        assert_eq!(report.created(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_reconciles_create_once() {
        let platform = Arc::new(FakePlatform::new());
        let registrar = ComplianceWebhookRegistrar::new(platform.clone(), "https://gateway.test");

        let (shop_a, token_a) = (shop(), token());
        let (shop_b, token_b) = (shop(), token());
        let (a, b) = tokio::join!(
            registrar.reconcile(&shop_a, &token_a),
            registrar.reconcile(&shop_b, &token_b)
        );
        assert_eq!(a.created() + b.created(), WebhookTopic::MANDATORY.len());
        assert_eq!(platform.subscriptions(&shop()).len(), 4);
    }
}

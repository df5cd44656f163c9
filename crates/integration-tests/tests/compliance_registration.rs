//! Integration tests for mandatory webhook subscription reconciliation.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use secrecy::SecretString;
use shopgate_core::{ShopDomain, WebhookTopic};
use shopgate_gateway::services::{ComplianceWebhookRegistrar, TopicOutcome};
use shopgate_integration_tests::testing::{FakePlatform, TEST_BASE_URL};

fn shop() -> ShopDomain {
    ShopDomain::parse("acme.myshopify.com").unwrap()
}

fn token() -> SecretString {
    SecretString::from("shpat_test")
}

#[tokio::test]
async fn test_second_run_creates_nothing() {
    let platform = Arc::new(FakePlatform::new());
    let registrar = ComplianceWebhookRegistrar::new(platform.clone(), TEST_BASE_URL);

    let first = registrar.reconcile(&shop(), &token()).await;
    let second = registrar.reconcile(&shop(), &token()).await;

    assert!(first.is_complete());
    assert_eq!(first.created(), WebhookTopic::MANDATORY.len());
    assert!(second.is_complete());
    assert_eq!(second.created(), 0);

    let subscriptions = platform.subscriptions(&shop());
    for topic in WebhookTopic::MANDATORY {
        let matching: Vec<_> = subscriptions.iter().filter(|s| s.topic == topic).collect();
        assert_eq!(matching.len(), 1, "{topic}");
        assert_eq!(
            matching[0].callback_url.as_deref(),
            Some(format!("{TEST_BASE_URL}{}", topic.path()).as_str())
        );
    }
}

#[tokio::test]
async fn test_concurrent_runs_create_once() {
    let platform = Arc::new(FakePlatform::new());
    let registrar = Arc::new(ComplianceWebhookRegistrar::new(
        platform.clone(),
        TEST_BASE_URL,
    ));

    let a = {
        let registrar = registrar.clone();
        tokio::spawn(async move { registrar.reconcile(&shop(), &token()).await })
    };
    let b = {
        let registrar = registrar.clone();
        tokio::spawn(async move { registrar.reconcile(&shop(), &token()).await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a.created() + b.created(), WebhookTopic::MANDATORY.len());
    assert_eq!(
        platform.subscriptions(&shop()).len(),
        WebhookTopic::MANDATORY.len()
    );
}

#[tokio::test]
async fn test_failed_topic_is_retried_next_run() {
    let platform = Arc::new(FakePlatform::new());
    platform.fail_create_for(WebhookTopic::CustomersRedact);
    let registrar = ComplianceWebhookRegistrar::new(platform.clone(), TEST_BASE_URL);

    let report = registrar.reconcile(&shop(), &token()).await;

    assert!(!report.is_complete());
    assert_eq!(
        report.failures().collect::<Vec<_>>(),
        vec![WebhookTopic::CustomersRedact]
    );
    assert_eq!(report.created(), WebhookTopic::MANDATORY.len() - 1);

    // The platform recovers; a second run fills only the gap.
    platform.clear_failures();
    let report = registrar.reconcile(&shop(), &token()).await;
    assert!(report.is_complete());
    assert_eq!(report.created(), 1);
    assert_eq!(
        platform.subscriptions(&shop()).len(),
        WebhookTopic::MANDATORY.len()
    );
}

#[tokio::test]
async fn test_stale_address_gets_new_subscription() {
    let platform = Arc::new(FakePlatform::new());
    platform.add_subscription(
        &shop(),
        WebhookTopic::AppUninstalled,
        "https://old-host.example/webhooks/app/uninstalled",
    );
    let registrar = ComplianceWebhookRegistrar::new(platform.clone(), TEST_BASE_URL);

    let report = registrar.reconcile(&shop(), &token()).await;

    let outcome = report
        .outcomes
        .iter()
        .find(|(topic, _)| *topic == WebhookTopic::AppUninstalled)
        .map(|(_, outcome)| outcome.clone())
        .unwrap();
    assert_eq!(outcome, TopicOutcome::Created);
}

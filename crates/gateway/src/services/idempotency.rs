//! Webhook dedup guard.
//!
//! Wraps an [`IdempotencyStore`] with a per-call timeout and a
//! [`CircuitBreaker`]. The guard never blocks ingestion: when the store is
//! slow, failing, or tripped, the delivery is processed unguarded and a
//! warning is logged. Duplicates are suppressed on a best-effort basis;
//! downstream processing is expected to tolerate the occasional repeat.

use std::sync::Arc;
use std::time::Duration;

use shopgate_core::DeliveryId;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use crate::config::WebhookConfig;
use crate::db::{CheckAndSet, IdempotencyStore};

/// Why a delivery was let through without a dedup record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnguardedReason {
    /// The delivery carried no id.
    MissingDeliveryId,
    /// The store errored or exceeded its time budget.
    StoreUnavailable,
    /// The breaker is open; the store was not called.
    CircuitOpen,
}

/// Outcome of [`IdempotencyGuard::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// First delivery within the window; a record now exists.
    Fresh(DeliveryId),
    /// A live record exists; skip processing.
    Duplicate,
    /// Process without a dedup record.
    Unguarded(UnguardedReason),
}

impl GuardDecision {
    /// Whether the delivery should be processed.
    #[must_use]
    pub const fn should_process(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

/// Fail-open dedup guard shared across requests.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    breaker: Arc<CircuitBreaker>,
    ttl: Duration,
    timeout: Duration,
}

impl std::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("breaker", &self.breaker.state())
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl IdempotencyGuard {
    /// Create a guard from webhook settings.
    #[must_use]
    pub fn new(store: Arc<dyn IdempotencyStore>, config: &WebhookConfig) -> Self {
        Self {
            store,
            breaker: Arc::new(CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_cooldown,
            )),
            ttl: config.idempotency_ttl,
            timeout: config.idempotency_timeout,
        }
    }

    /// The breaker guarding the store.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Decide whether a delivery should be processed, recording it if so.
    pub async fn check(&self, delivery: Option<&DeliveryId>) -> GuardDecision {
        let Some(delivery) = delivery else {
            warn!("Webhook has no delivery id, processing without dedup");
            return GuardDecision::Unguarded(UnguardedReason::MissingDeliveryId);
        };

        if !self.breaker.try_acquire() {
            warn!(delivery_id = %delivery, "Idempotency breaker open, processing without dedup");
            return GuardDecision::Unguarded(UnguardedReason::CircuitOpen);
        }

        let result =
            tokio::time::timeout(self.timeout, self.store.check_and_set(delivery, self.ttl)).await;

        match result {
            Ok(Ok(CheckAndSet::Fresh)) => {
                self.breaker.record_success();
                GuardDecision::Fresh(delivery.clone())
            }
            Ok(Ok(CheckAndSet::Duplicate)) => {
                self.breaker.record_success();
                debug!(delivery_id = %delivery, "Duplicate webhook delivery");
                GuardDecision::Duplicate
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                warn!(delivery_id = %delivery, error = %e, "Idempotency store failed, processing without dedup");
                GuardDecision::Unguarded(UnguardedReason::StoreUnavailable)
            }
            Err(_) => {
                self.breaker.record_failure();
                warn!(
                    delivery_id = %delivery,
                    timeout_ms = self.timeout.as_millis(),
                    "Idempotency store timed out, processing without dedup"
                );
                GuardDecision::Unguarded(UnguardedReason::StoreUnavailable)
            }
        }
    }

    /// Best-effort removal of a record written by [`Self::check`], used when
    /// the delivery could not be handed off.
    pub async fn release(&self, delivery: &DeliveryId) {
        match tokio::time::timeout(self.timeout, self.store.release(delivery)).await {
            Ok(Ok(())) => debug!(delivery_id = %delivery, "Released idempotency record"),
            Ok(Err(e)) => {
                warn!(delivery_id = %delivery, error = %e, "Failed to release idempotency record");
            }
            Err(_) => warn!(delivery_id = %delivery, "Timed out releasing idempotency record"),
        }
    }
}

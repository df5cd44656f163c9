//! Webhook delivery dedup records.
//!
//! A record is keyed by [`DeliveryId::idempotency_key`] and expires after the
//! configured TTL. [`IdempotencyStore::check_and_set`] is a single atomic
//! operation: among any number of concurrent callers with the same key, at
//! most one observes [`CheckAndSet::Fresh`] per TTL window.

use std::time::Duration;

use async_trait::async_trait;
use shopgate_core::DeliveryId;
use sqlx::PgPool;
use thiserror::Error;

/// Result of an atomic check-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckAndSet {
    /// No live record existed; one has now been written.
    Fresh,
    /// A live record already exists for this delivery.
    Duplicate,
}

/// Errors from the dedup store.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store is not reachable.
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for webhook dedup records.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically record `delivery` unless a live record exists.
    async fn check_and_set(
        &self,
        delivery: &DeliveryId,
        ttl: Duration,
    ) -> Result<CheckAndSet, IdempotencyError>;

    /// Drop the record for `delivery` so a redelivery is processed.
    async fn release(&self, delivery: &DeliveryId) -> Result<(), IdempotencyError>;

    /// Delete expired records, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64, IdempotencyError>;
}

/// `PostgreSQL`-backed dedup store.
#[derive(Debug, Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    /// Create a new dedup store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn check_and_set(
        &self,
        delivery: &DeliveryId,
        ttl: Duration,
    ) -> Result<CheckAndSet, IdempotencyError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        // A row is returned only when this statement inserted the key or
        // reclaimed an expired one; a live row makes the WHERE fail.
        let claimed: Option<String> = sqlx::query_scalar(
            r"
            INSERT INTO gateway.webhook_idempotency (key, expires_at)
            VALUES ($1, now() + $2 * INTERVAL '1 millisecond')
            ON CONFLICT (key) DO UPDATE SET expires_at = EXCLUDED.expires_at
            WHERE webhook_idempotency.expires_at <= now()
            RETURNING key
            ",
        )
        .bind(delivery.idempotency_key())
        .bind(ttl_ms)
        .fetch_optional(&self.pool)
        .await?;

        Ok(if claimed.is_some() {
            CheckAndSet::Fresh
        } else {
            CheckAndSet::Duplicate
        })
    }

    async fn release(&self, delivery: &DeliveryId) -> Result<(), IdempotencyError> {
        sqlx::query("DELETE FROM gateway.webhook_idempotency WHERE key = $1")
            .bind(delivery.idempotency_key())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, IdempotencyError> {
        let result = sqlx::query("DELETE FROM gateway.webhook_idempotency WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

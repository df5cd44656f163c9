//! Durable queue of verified webhook payloads.
//!
//! The gateway only enqueues; a separate worker consumes `webhook_job` rows.
//! Payloads are stored as the exact bytes received.

use async_trait::async_trait;
use axum::body::Bytes;
use shopgate_core::{DeliveryId, ShopDomain, WebhookJobId, WebhookTopic};
use sqlx::PgPool;
use thiserror::Error;

/// A verified webhook ready for background processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookJob {
    /// Topic the delivery was received on.
    pub topic: WebhookTopic,
    /// Shop the event belongs to.
    pub shop: ShopDomain,
    /// Delivery id, when the platform sent one.
    pub delivery_id: Option<DeliveryId>,
    /// API version the payload was rendered with.
    pub api_version: Option<String>,
    /// Raw request body.
    pub payload: Bytes,
}

/// Errors from the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The queue rejected the job.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Destination for verified webhooks.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Durably enqueue a job.
    async fn enqueue(&self, job: WebhookJob) -> Result<WebhookJobId, QueueError>;
}

/// `PostgreSQL`-backed job queue.
#[derive(Debug, Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    /// Create a new job queue.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: WebhookJob) -> Result<WebhookJobId, QueueError> {
        let id: WebhookJobId = sqlx::query_scalar(
            r"
            INSERT INTO gateway.webhook_job (topic, shop, delivery_id, api_version, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(job.topic.as_str())
        .bind(&job.shop)
        .bind(job.delivery_id.as_ref().map(DeliveryId::as_str))
        .bind(&job.api_version)
        .bind(job.payload.as_ref())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}

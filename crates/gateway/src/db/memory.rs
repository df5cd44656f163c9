//! In-memory store implementations.
//!
//! Used with `GATEWAY_STORAGE=memory` for single-instance development and by
//! tests. Nothing survives a restart, and dedup records are per process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use moka::Expiry;
use moka::future::Cache;
use shopgate_core::{DeliveryId, ShopDomain, ShopUserId, WebhookJobId};
use tokio::sync::{Mutex, RwLock};

use super::credentials::{CredentialStore, NewStoreCredential, StoreCredential};
use super::idempotency::{CheckAndSet, IdempotencyError, IdempotencyStore};
use super::jobs::{JobQueue, QueueError, WebhookJob};
use super::users::{ShopUser, UserStore, trial_end};
use super::RepositoryError;

/// Upper bound on live dedup records held in memory.
const MAX_IDEMPOTENCY_RECORDS: u64 = 1_000_000;

// =============================================================================
// Credentials
// =============================================================================

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<HashMap<ShopDomain, StoreCredential>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn upsert(
        &self,
        credential: NewStoreCredential,
    ) -> Result<StoreCredential, RepositoryError> {
        let now = Utc::now();
        let mut credentials = self.credentials.write().await;

        let stored = match credentials.remove(&credential.shop) {
            Some(existing) => StoreCredential {
                shop: credential.shop,
                access_token: credential.access_token,
                scopes: credential.scopes,
                platform_shop_id: credential.platform_shop_id.or(existing.platform_shop_id),
                shop_name: credential.shop_name.or(existing.shop_name),
                is_active: true,
                installed_at: existing.installed_at,
                updated_at: now,
            },
            None => StoreCredential {
                shop: credential.shop,
                access_token: credential.access_token,
                scopes: credential.scopes,
                platform_shop_id: credential.platform_shop_id,
                shop_name: credential.shop_name,
                is_active: true,
                installed_at: now,
                updated_at: now,
            },
        };

        credentials.insert(stored.shop.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_by_shop(
        &self,
        shop: &ShopDomain,
    ) -> Result<Option<StoreCredential>, RepositoryError> {
        Ok(self.credentials.read().await.get(shop).cloned())
    }

    async fn deactivate(&self, shop: &ShopDomain) -> Result<bool, RepositoryError> {
        let mut credentials = self.credentials.write().await;
        Ok(credentials.get_mut(shop).is_some_and(|credential| {
            credential.is_active = false;
            credential.updated_at = Utc::now();
            true
        }))
    }

    async fn list(&self) -> Result<Vec<StoreCredential>, RepositoryError> {
        let mut all: Vec<StoreCredential> =
            self.credentials.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }
}

// =============================================================================
// Users
// =============================================================================

/// In-memory user store.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<ShopDomain, ShopUser>>,
    next_id: AtomicI32,
}

impl MemoryUserStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_or_create(
        &self,
        shop: &ShopDomain,
        trial_days: u32,
    ) -> Result<(ShopUser, bool), RepositoryError> {
        let mut users = self.users.lock().await;

        if let Some(user) = users.get(shop) {
            return Ok((user.clone(), false));
        }

        let now = Utc::now();
        let user = ShopUser {
            id: ShopUserId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
            shop: shop.clone(),
            trial_ends_at: trial_end(now, trial_days),
            created_at: now,
        };
        users.insert(shop.clone(), user.clone());
        Ok((user, true))
    }
}

// =============================================================================
// Idempotency
// =============================================================================

/// Expires each record after the TTL stored as its value.
struct TtlExpiry;

impl Expiry<String, Duration> for TtlExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        ttl: &Duration,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(*ttl)
    }
}

/// In-memory dedup store backed by a `moka` cache.
///
/// `entry().or_insert()` is atomic per key, which gives the same
/// single-winner guarantee as the `PostgreSQL` upsert within one process.
#[derive(Clone)]
pub struct MemoryIdempotencyStore {
    records: Cache<String, Duration>,
}

impl std::fmt::Debug for MemoryIdempotencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIdempotencyStore")
            .field("entries", &self.records.entry_count())
            .finish()
    }
}

impl Default for MemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdempotencyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let records = Cache::builder()
            .max_capacity(MAX_IDEMPOTENCY_RECORDS)
            .expire_after(TtlExpiry)
            .build();
        Self { records }
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn check_and_set(
        &self,
        delivery: &DeliveryId,
        ttl: Duration,
    ) -> Result<CheckAndSet, IdempotencyError> {
        let entry = self
            .records
            .entry(delivery.idempotency_key())
            .or_insert(ttl)
            .await;

        Ok(if entry.is_fresh() {
            CheckAndSet::Fresh
        } else {
            CheckAndSet::Duplicate
        })
    }

    async fn release(&self, delivery: &DeliveryId) -> Result<(), IdempotencyError> {
        self.records.invalidate(&delivery.idempotency_key()).await;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, IdempotencyError> {
        let before = self.records.entry_count();
        self.records.run_pending_tasks().await;
        Ok(before.saturating_sub(self.records.entry_count()))
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// In-memory job queue that keeps every enqueued job for inspection.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<(WebhookJobId, WebhookJob)>>,
    next_id: AtomicI64,
}

impl MemoryJobQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the jobs enqueued so far, oldest first.
    pub async fn jobs(&self) -> Vec<WebhookJob> {
        self.jobs
            .lock()
            .await
            .iter()
            .map(|(_, job)| job.clone())
            .collect()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: WebhookJob) -> Result<WebhookJobId, QueueError> {
        let id = WebhookJobId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.jobs.lock().await.push((id, job));
        Ok(id)
    }
}

//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::GatewayConfig;
use crate::db::memory::{
    MemoryCredentialStore, MemoryIdempotencyStore, MemoryJobQueue, MemoryUserStore,
};
use crate::db::{
    CredentialStore, IdempotencyStore, JobQueue, PgCredentialStore, PgIdempotencyStore,
    PgJobQueue, PgUserStore, UserStore,
};
use crate::services::{IdempotencyGuard, InstallationFlow};
use crate::shopify::PlatformApi;

/// The set of stores the gateway runs against.
#[derive(Clone)]
pub struct Backends {
    /// Shop credentials.
    pub credentials: Arc<dyn CredentialStore>,
    /// Shop users.
    pub users: Arc<dyn UserStore>,
    /// Webhook dedup records.
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// Hand-off queue to the background worker.
    pub queue: Arc<dyn JobQueue>,
    /// Connection pool, when running on `PostgreSQL`.
    pub pool: Option<PgPool>,
}

impl Backends {
    /// All stores backed by one `PostgreSQL` pool.
    #[must_use]
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            credentials: Arc::new(PgCredentialStore::new(pool.clone())),
            users: Arc::new(PgUserStore::new(pool.clone())),
            idempotency: Arc::new(PgIdempotencyStore::new(pool.clone())),
            queue: Arc::new(PgJobQueue::new(pool.clone())),
            pool: Some(pool),
        }
    }

    /// All stores in process memory.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            credentials: Arc::new(MemoryCredentialStore::new()),
            users: Arc::new(MemoryUserStore::new()),
            idempotency: Arc::new(MemoryIdempotencyStore::new()),
            queue: Arc::new(MemoryJobQueue::new()),
            pool: None,
        }
    }
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Arc<GatewayConfig>,
    backends: Backends,
    guard: IdempotencyGuard,
    installation: InstallationFlow,
}

impl AppState {
    /// Wire the services over the given platform client and stores.
    #[must_use]
    pub fn new(config: GatewayConfig, platform: Arc<dyn PlatformApi>, backends: Backends) -> Self {
        let config = Arc::new(config);
        let guard = IdempotencyGuard::new(backends.idempotency.clone(), &config.webhooks);
        let installation = InstallationFlow::new(
            config.clone(),
            platform,
            backends.credentials.clone(),
            backends.users.clone(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                backends,
                guard,
                installation,
            }),
        }
    }

    /// Get a reference to the gateway configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool, if any.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.backends.pool.as_ref()
    }

    /// Shop credentials.
    #[must_use]
    pub fn credentials(&self) -> &dyn CredentialStore {
        self.inner.backends.credentials.as_ref()
    }

    /// Hand-off queue to the background worker.
    #[must_use]
    pub fn queue(&self) -> &dyn JobQueue {
        self.inner.backends.queue.as_ref()
    }

    /// Webhook dedup guard.
    #[must_use]
    pub fn guard(&self) -> &IdempotencyGuard {
        &self.inner.guard
    }

    /// OAuth installation flow.
    #[must_use]
    pub fn installation(&self) -> &InstallationFlow {
        &self.inner.installation
    }
}

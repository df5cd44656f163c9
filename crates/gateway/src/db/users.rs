//! Application-level shop users.
//!
//! A user is created the first time a shop installs the app and gets a
//! trial window starting at that moment. Re-installs find the existing user.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shopgate_core::{ShopDomain, ShopUserId};
use sqlx::PgPool;

use super::RepositoryError;

/// A shop's application user.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ShopUser {
    /// Row id.
    pub id: ShopUserId,
    /// Owning shop.
    pub shop: ShopDomain,
    /// End of the trial granted on first install.
    pub trial_ends_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Storage for shop users.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Return the user for `shop`, creating it with a `trial_days` trial if
    /// absent. The flag is `true` when the user was created by this call.
    async fn find_or_create(
        &self,
        shop: &ShopDomain,
        trial_days: u32,
    ) -> Result<(ShopUser, bool), RepositoryError>;
}

/// Compute the trial end for a user created at `now`.
pub(crate) fn trial_end(now: DateTime<Utc>, trial_days: u32) -> DateTime<Utc> {
    now + Duration::days(i64::from(trial_days))
}

/// `PostgreSQL`-backed user store.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Create a new user store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_or_create(
        &self,
        shop: &ShopDomain,
        trial_days: u32,
    ) -> Result<(ShopUser, bool), RepositoryError> {
        // Concurrent installs for one shop race on the unique constraint;
        // exactly one insert wins and both read the same row.
        let inserted = sqlx::query_as::<_, ShopUser>(
            r"
            INSERT INTO gateway.shop_user (shop, trial_ends_at)
            VALUES ($1, $2)
            ON CONFLICT (shop) DO NOTHING
            RETURNING id, shop, trial_ends_at, created_at
            ",
        )
        .bind(shop)
        .bind(trial_end(Utc::now(), trial_days))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(user) = inserted {
            return Ok((user, true));
        }

        let user = sqlx::query_as::<_, ShopUser>(
            r"
            SELECT id, shop, trial_ends_at, created_at
            FROM gateway.shop_user
            WHERE shop = $1
            ",
        )
        .bind(shop)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            RepositoryError::DataCorruption(format!("shop_user for {shop} vanished after insert"))
        })?;

        Ok((user, false))
    }
}

//! Per-shop offline access tokens.
//!
//! Exactly one credential exists per shop. A re-install replaces the token
//! and re-activates the record; deactivation (on uninstall) is performed by
//! the background worker or the CLI.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use shopgate_core::ShopDomain;
use sqlx::PgPool;

use super::RepositoryError;

// =============================================================================
// Types
// =============================================================================

/// A stored shop credential.
///
/// Implements `Debug` manually to redact the access token.
#[derive(Clone)]
pub struct StoreCredential {
    /// Shop the token belongs to.
    pub shop: ShopDomain,
    /// Offline access token (HIGH PRIVILEGE - redacted in debug output).
    pub access_token: SecretString,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Platform-assigned shop id, when the metadata fetch succeeded.
    pub platform_shop_id: Option<String>,
    /// Shop display name, when known.
    pub shop_name: Option<String>,
    /// False once the app has been uninstalled.
    pub is_active: bool,
    /// First install time.
    pub installed_at: DateTime<Utc>,
    /// Last token refresh.
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for StoreCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredential")
            .field("shop", &self.shop)
            .field("access_token", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .field("platform_shop_id", &self.platform_shop_id)
            .field("shop_name", &self.shop_name)
            .field("is_active", &self.is_active)
            .field("installed_at", &self.installed_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Input for [`CredentialStore::upsert`].
#[derive(Clone)]
pub struct NewStoreCredential {
    /// Shop the token belongs to.
    pub shop: ShopDomain,
    /// Offline access token.
    pub access_token: SecretString,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Platform shop id; `None` keeps any previously stored value.
    pub platform_shop_id: Option<String>,
    /// Shop display name; `None` keeps any previously stored value.
    pub shop_name: Option<String>,
}

impl std::fmt::Debug for NewStoreCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewStoreCredential")
            .field("shop", &self.shop)
            .field("access_token", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .field("platform_shop_id", &self.platform_shop_id)
            .field("shop_name", &self.shop_name)
            .finish()
    }
}

/// Storage for shop credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace the credential for a shop, re-activating it.
    async fn upsert(&self, credential: NewStoreCredential)
    -> Result<StoreCredential, RepositoryError>;

    /// Look up the credential for a shop, active or not.
    async fn get_by_shop(
        &self,
        shop: &ShopDomain,
    ) -> Result<Option<StoreCredential>, RepositoryError>;

    /// Mark a shop's credential inactive. Returns `false` if none exists.
    async fn deactivate(&self, shop: &ShopDomain) -> Result<bool, RepositoryError>;

    /// List all credentials, most recently updated first.
    async fn list(&self) -> Result<Vec<StoreCredential>, RepositoryError>;
}

/// Split a stored comma-separated scope string.
pub(crate) fn split_scopes(scope: &str) -> Vec<String> {
    scope
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// Internal row type for `PostgreSQL` queries.
#[derive(Debug, sqlx::FromRow)]
struct StoreCredentialRow {
    shop: ShopDomain,
    access_token: String,
    scope: String,
    platform_shop_id: Option<String>,
    shop_name: Option<String>,
    is_active: bool,
    installed_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<StoreCredentialRow> for StoreCredential {
    fn from(row: StoreCredentialRow) -> Self {
        Self {
            shop: row.shop,
            access_token: SecretString::from(row.access_token),
            scopes: split_scopes(&row.scope),
            platform_shop_id: row.platform_shop_id,
            shop_name: row.shop_name,
            is_active: row.is_active,
            installed_at: row.installed_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_COLUMNS: &str = "shop, access_token, scope, platform_shop_id, shop_name, \
                              is_active, installed_at, updated_at";

/// `PostgreSQL`-backed credential store.
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    /// Create a new credential store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn upsert(
        &self,
        credential: NewStoreCredential,
    ) -> Result<StoreCredential, RepositoryError> {
        let row = sqlx::query_as::<_, StoreCredentialRow>(&format!(
            r"
            INSERT INTO gateway.store_credential
                (shop, access_token, scope, platform_shop_id, shop_name)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (shop) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                scope = EXCLUDED.scope,
                platform_shop_id = COALESCE(EXCLUDED.platform_shop_id, store_credential.platform_shop_id),
                shop_name = COALESCE(EXCLUDED.shop_name, store_credential.shop_name),
                is_active = TRUE,
                updated_at = now()
            RETURNING {SELECT_COLUMNS}
            "
        ))
        .bind(&credential.shop)
        .bind(credential.access_token.expose_secret())
        .bind(credential.scopes.join(","))
        .bind(&credential.platform_shop_id)
        .bind(&credential.shop_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_by_shop(
        &self,
        shop: &ShopDomain,
    ) -> Result<Option<StoreCredential>, RepositoryError> {
        let row = sqlx::query_as::<_, StoreCredentialRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM gateway.store_credential WHERE shop = $1"
        ))
        .bind(shop)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(StoreCredential::from))
    }

    async fn deactivate(&self, shop: &ShopDomain) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE gateway.store_credential
            SET is_active = FALSE, updated_at = now()
            WHERE shop = $1
            ",
        )
        .bind(shop)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<StoreCredential>, RepositoryError> {
        let rows = sqlx::query_as::<_, StoreCredentialRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM gateway.store_credential ORDER BY updated_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoreCredential::from).collect())
    }
}

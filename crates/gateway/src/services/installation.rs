//! OAuth installation flow.
//!
//! ```text
//! Start -> AwaitingCallback -> TokenExchange -> Persisted -> WebhooksRegistered -> Complete
//!   \__________________\________________\______________\_________________\--> Failed
//! ```
//!
//! [`InstallationFlow::initiate`] covers the first transition (redirect to the
//! platform's consent screen). [`InstallationFlow::handle_callback`] resumes
//! from `AwaitingCallback` when the platform redirects back, and drives the
//! remaining transitions. Nothing is persisted before the token exchange has
//! succeeded.

use std::sync::Arc;

use secrecy::ExposeSecret;
use shopgate_core::{InstallState, ShopDomain, ShopDomainError};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::compliance::{ComplianceWebhookRegistrar, RegistrationReport};
use crate::config::GatewayConfig;
use crate::db::{CredentialStore, NewStoreCredential, RepositoryError, ShopUser, UserStore};
use crate::shopify::hmac::verify_query_hmac;
use crate::shopify::{PlatformApi, ShopifyError, authorization_url, mask_secret};

// =============================================================================
// Stages
// =============================================================================

/// Stage of one installation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    /// Nothing has happened yet.
    Start,
    /// The merchant was sent to the consent screen.
    AwaitingCallback,
    /// A signed callback arrived; exchanging the code.
    TokenExchange,
    /// Credential and user are stored.
    Persisted,
    /// Mandatory webhooks were reconciled (possibly partially).
    WebhooksRegistered,
    /// Session established and response ready.
    Complete,
    /// The attempt was abandoned.
    Failed,
}

impl InstallStage {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// The single forward successor of a non-terminal stage.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Start => Some(Self::AwaitingCallback),
            Self::AwaitingCallback => Some(Self::TokenExchange),
            Self::TokenExchange => Some(Self::Persisted),
            Self::Persisted => Some(Self::WebhooksRegistered),
            Self::WebhooksRegistered => Some(Self::Complete),
            Self::Complete | Self::Failed => None,
        }
    }

    /// Whether `self -> to` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }
}

/// Tracks the stage of one attempt and logs each transition.
#[derive(Debug)]
struct StageTracker {
    stage: InstallStage,
}

impl StageTracker {
    const fn at(stage: InstallStage) -> Self {
        Self { stage }
    }

    fn advance(&mut self, to: InstallStage) {
        debug_assert!(
            self.stage.can_transition_to(to),
            "illegal install transition {:?} -> {to:?}",
            self.stage
        );
        debug!(from = ?self.stage, to = ?to, "Install stage transition");
        self.stage = to;
    }

    fn fail(&mut self, reason: &InstallError) {
        if !self.stage.is_terminal() {
            warn!(at = ?self.stage, error = %reason, "Installation failed");
            self.stage = InstallStage::Failed;
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur during installation.
#[derive(Debug, Error)]
pub enum InstallError {
    /// A required query parameter is absent or blank.
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    /// The shop parameter is not a valid shop domain.
    #[error("invalid shop domain: {0}")]
    InvalidShop(#[from] ShopDomainError),

    /// The callback signature did not verify.
    #[error("callback signature is invalid")]
    SignatureInvalid,

    /// The merchant declined, or the platform reported an error.
    #[error("platform reported an error: {0}")]
    PlatformDenied(String),

    /// The authorization-code exchange failed.
    #[error("token exchange failed: {0}")]
    TokenExchange(#[source] ShopifyError),

    /// Storing the credential or user failed.
    #[error("persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
}

// =============================================================================
// Inputs and outputs
// =============================================================================

/// Query parameters of an OAuth callback, in the order received.
///
/// Kept as raw pairs because signature verification must see every
/// parameter the platform sent, including ones this gateway does not use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pairs: Vec<(String, String)>,
}

impl CallbackParams {
    /// Parse a raw (still percent-encoded) query string.
    #[must_use]
    pub fn from_query(raw: &str) -> Self {
        Self {
            pairs: url::form_urlencoded::parse(raw.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    /// First value for `key`, if present and not blank.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    /// All pairs as borrowed slices.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CallbackParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Where to send the merchant to grant access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRedirect {
    /// Platform consent URL.
    pub authorize_url: String,
    /// State embedded in the URL.
    pub state: InstallState,
    /// Stage reached.
    pub stage: InstallStage,
}

/// Result of a successful callback.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// Installed shop.
    pub shop: ShopDomain,
    /// The shop's application user.
    pub user: ShopUser,
    /// Whether the user was created by this install.
    pub user_created: bool,
    /// Embedding host, when installed from inside the admin.
    pub host: Option<String>,
    /// Mandatory webhook reconciliation results.
    pub webhooks: RegistrationReport,
    /// Stage reached.
    pub stage: InstallStage,
}

impl InstallOutcome {
    /// Whether the install was started from inside the platform admin.
    #[must_use]
    pub const fn is_embedded(&self) -> bool {
        self.host.is_some()
    }
}

// =============================================================================
// Flow
// =============================================================================

/// Orchestrates the OAuth installation handshake.
#[derive(Clone)]
pub struct InstallationFlow {
    config: Arc<GatewayConfig>,
    platform: Arc<dyn PlatformApi>,
    credentials: Arc<dyn CredentialStore>,
    users: Arc<dyn UserStore>,
    registrar: ComplianceWebhookRegistrar,
}

impl std::fmt::Debug for InstallationFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationFlow")
            .field("redirect_uri", &self.config.redirect_uri())
            .finish_non_exhaustive()
    }
}

impl InstallationFlow {
    /// Create a new installation flow.
    #[must_use]
    pub fn new(
        config: Arc<GatewayConfig>,
        platform: Arc<dyn PlatformApi>,
        credentials: Arc<dyn CredentialStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let registrar = ComplianceWebhookRegistrar::new(platform.clone(), config.base_url.clone());
        Self {
            config,
            platform,
            credentials,
            users,
            registrar,
        }
    }

    /// The registrar used after each install.
    #[must_use]
    pub const fn registrar(&self) -> &ComplianceWebhookRegistrar {
        &self.registrar
    }

    /// Begin an install: normalize the shop and build the consent URL.
    ///
    /// # Errors
    ///
    /// Returns `InstallError::MissingParameter` if `shop_input` is absent or
    /// blank, and `InstallError::InvalidShop` if it cannot be normalized.
    #[instrument(skip(self))]
    pub fn initiate(
        &self,
        shop_input: Option<&str>,
        host: Option<&str>,
    ) -> Result<InstallRedirect, InstallError> {
        let mut tracker = StageTracker::at(InstallStage::Start);

        let result = self.build_redirect(shop_input, host);
        match result {
            Ok((authorize_url, state)) => {
                tracker.advance(InstallStage::AwaitingCallback);
                info!(shop = %state.shop(), embedded = state.host().is_some(), "Redirecting to consent screen");
                Ok(InstallRedirect {
                    authorize_url,
                    state,
                    stage: tracker.stage,
                })
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    fn build_redirect(
        &self,
        shop_input: Option<&str>,
        host: Option<&str>,
    ) -> Result<(String, InstallState), InstallError> {
        let shop_input = shop_input
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(InstallError::MissingParameter("shop"))?;

        let shop = ShopDomain::normalize_with_suffix(shop_input, &self.config.shopify.shop_suffix)?;
        let host = host
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(String::from);

        let state = InstallState::new(shop, host);
        let url = authorization_url(
            &self.config.shopify,
            state.shop(),
            &self.config.redirect_uri(),
            &state.encode(),
        );
        Ok((url, state))
    }

    /// Complete an install from the platform's redirect back to us.
    ///
    /// # Errors
    ///
    /// - `MissingParameter` if `shop` or `code` is absent
    /// - `PlatformDenied` if the platform sent an `error` parameter
    /// - `SignatureInvalid` if the query signature does not verify
    /// - `TokenExchange` if the code exchange fails (nothing is persisted)
    /// - `Persistence` if the credential or user cannot be stored
    #[instrument(skip(self, params), fields(shop = params.get("shop").unwrap_or_default()))]
    pub async fn handle_callback(
        &self,
        params: &CallbackParams,
    ) -> Result<InstallOutcome, InstallError> {
        let mut tracker = StageTracker::at(InstallStage::AwaitingCallback);

        match self.complete(params, &mut tracker).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    async fn complete(
        &self,
        params: &CallbackParams,
        tracker: &mut StageTracker,
    ) -> Result<InstallOutcome, InstallError> {
        if let Some(platform_error) = params.get("error") {
            let description = params.get("error_description").unwrap_or(platform_error);
            return Err(InstallError::PlatformDenied(description.to_string()));
        }

        let shop_param = params
            .get("shop")
            .ok_or(InstallError::MissingParameter("shop"))?;
        let code = params
            .get("code")
            .ok_or(InstallError::MissingParameter("code"))?;

        let secret = self.config.shopify.client_secret.expose_secret().as_bytes();
        if !verify_query_hmac(params.pairs(), secret) {
            return Err(InstallError::SignatureInvalid);
        }

        // The signed value must already be canonical.
        let shop = ShopDomain::parse(shop_param)?;

        tracker.advance(InstallStage::TokenExchange);
        let token = self
            .platform
            .exchange_code(&shop, code)
            .await
            .map_err(|e| {
                error!(
                    shop = %shop,
                    client_id = %mask_secret(&self.config.shopify.client_id),
                    code = %mask_secret(code),
                    error = %e,
                    "Token exchange failed"
                );
                InstallError::TokenExchange(e)
            })?;

        let metadata = match self.platform.shop_metadata(&shop, &token.access_token).await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(shop = %shop, error = %e, "Shop metadata fetch failed, storing credential without shop id");
                None
            }
        };

        let (platform_shop_id, shop_name) =
            metadata.map_or((None, None), |m| (Some(m.platform_shop_id), Some(m.name)));

        self.credentials
            .upsert(NewStoreCredential {
                shop: shop.clone(),
                access_token: token.access_token.clone(),
                scopes: token.scopes.clone(),
                platform_shop_id,
                shop_name,
            })
            .await?;

        let (user, user_created) = self
            .users
            .find_or_create(&shop, self.config.install.trial_days)
            .await?;
        tracker.advance(InstallStage::Persisted);

        let webhooks = self.registrar.reconcile(&shop, &token.access_token).await;
        tracker.advance(InstallStage::WebhooksRegistered);

        let host = self.recover_host(params, &shop);
        tracker.advance(InstallStage::Complete);

        info!(
            shop = %shop,
            user_created,
            embedded = host.is_some(),
            webhooks_complete = webhooks.is_complete(),
            "Installation complete"
        );

        Ok(InstallOutcome {
            shop,
            user,
            user_created,
            host,
            webhooks,
            stage: tracker.stage,
        })
    }

    /// The embedding host from the query, or else from the round-tripped state.
    fn recover_host(&self, params: &CallbackParams, shop: &ShopDomain) -> Option<String> {
        if let Some(host) = params.get("host") {
            return Some(host.to_string());
        }

        let raw_state = params.get("state")?;
        match InstallState::decode(raw_state) {
            Ok(state) if state.shop() == shop => state.into_parts().1,
            Ok(state) => {
                warn!(
                    shop = %shop,
                    state_shop = %state.shop(),
                    "Callback state names a different shop, ignoring its host"
                );
                None
            }
            Err(e) => {
                debug!(error = %e, "Callback state is not an install state");
                None
            }
        }
    }
}

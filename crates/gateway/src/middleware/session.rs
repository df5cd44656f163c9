//! Session middleware configuration.
//!
//! The install callback establishes a session for the shop. Embedded installs
//! run inside the platform admin iframe, so on HTTPS the cookie is sent with
//! `SameSite=None`; expiry is chosen per session by the callback handler.

use tower_sessions::cookie::SameSite;
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore};

use crate::config::GatewayConfig;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "shopgate_session";

/// Inactivity expiry for standalone sessions, in seconds (7 days).
pub const SESSION_EXPIRY_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Create the session layer over any session store.
///
/// Production uses `tower_sessions_sqlx_store::PostgresStore`; memory storage
/// and tests use `tower_sessions::MemoryStore`.
#[must_use]
pub fn create_session_layer<S>(store: S, config: &GatewayConfig) -> SessionManagerLayer<S>
where
    S: SessionStore + Clone,
{
    let is_secure = config.is_secure();
    let same_site = if is_secure {
        SameSite::None
    } else {
        SameSite::Lax
    };

    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY_SECONDS),
        ))
        .with_secure(is_secure)
        .with_same_site(same_site)
        .with_http_only(true)
        .with_path("/")
}

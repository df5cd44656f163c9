//! OAuth install routes.
//!
//! `/install` sends the merchant to the platform's consent screen;
//! `/auth/callback` is the fixed redirect URI the platform sends them back to.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    extract::{Query, RawQuery, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tower_sessions::{Expiry, Session};
use tracing::instrument;

use crate::error::{AppError, PageError};
use crate::middleware::session::SESSION_EXPIRY_SECONDS;
use crate::models::{CurrentShop, keys};
use crate::services::{CallbackParams, InstallOutcome};
use crate::state::AppState;

/// Delay between in-frame navigation attempts on the interstitial page.
const INTERSTITIAL_RETRY_DELAY_MS: u32 = 400;

// =============================================================================
// Templates
// =============================================================================

/// Interstitial shown after an embedded install.
///
/// Tries in-frame navigation through App Bridge a bounded number of times,
/// then falls back to a top-level redirect.
#[derive(Template, WebTemplate)]
#[template(path = "interstitial.html")]
pub struct InterstitialTemplate {
    pub api_key: String,
    pub target_url: String,
    pub target_json: String,
    pub max_attempts: u32,
    pub retry_delay_ms: u32,
}

/// Encode a string as a JavaScript literal safe inside a `<script>` element.
fn js_string(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/")
}

// =============================================================================
// Query Parameters
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct InstallQuery {
    pub shop: Option<String>,
    pub host: Option<String>,
}

/// A plain 302 redirect.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

// =============================================================================
// Route Handlers
// =============================================================================

/// GET /install - Begin the OAuth handshake.
#[instrument(skip(state))]
pub async fn install(
    State(state): State<AppState>,
    Query(query): Query<InstallQuery>,
) -> Result<Response, PageError> {
    let redirect = state
        .installation()
        .initiate(query.shop.as_deref(), query.host.as_deref())?;

    Ok(found(&redirect.authorize_url))
}

/// GET /auth/callback - Complete the OAuth handshake.
///
/// The raw query is used as-is: signature verification must see every
/// parameter the platform sent.
#[instrument(skip(state, session, query))]
pub async fn callback(
    State(state): State<AppState>,
    session: Session,
    RawQuery(query): RawQuery,
) -> Result<Response, PageError> {
    let params = CallbackParams::from_query(query.as_deref().unwrap_or_default());
    let outcome = state.installation().handle_callback(&params).await?;

    establish_session(&session, &outcome).await?;

    if outcome.is_embedded() {
        let config = state.config();
        let target_url = dashboard_url(&config.install.dashboard_url, &outcome);
        let page = InterstitialTemplate {
            api_key: config.shopify.client_id.clone(),
            target_json: js_string(&target_url),
            target_url,
            max_attempts: config.install.interstitial_max_attempts,
            retry_delay_ms: INTERSTITIAL_RETRY_DELAY_MS,
        };
        return Ok(page.into_response());
    }

    Ok(found(&dashboard_url(
        &state.config().install.dashboard_url,
        &outcome,
    )))
}

/// Store the shop in a fresh session.
///
/// Embedded sessions end with the admin tab; standalone ones persist.
async fn establish_session(session: &Session, outcome: &InstallOutcome) -> Result<(), AppError> {
    session
        .cycle_id()
        .await
        .map_err(|e| AppError::Internal(format!("session cycle failed: {e}")))?;

    session
        .insert(
            keys::CURRENT_SHOP,
            CurrentShop {
                shop: outcome.shop.clone(),
                user_id: outcome.user.id,
                host: outcome.host.clone(),
            },
        )
        .await
        .map_err(|e| AppError::Internal(format!("session write failed: {e}")))?;

    session.set_expiry(Some(if outcome.is_embedded() {
        Expiry::OnSessionEnd
    } else {
        Expiry::OnInactivity(tower_sessions::cookie::time::Duration::seconds(
            SESSION_EXPIRY_SECONDS,
        ))
    }));

    Ok(())
}

/// The dashboard address with the shop (and host, when embedded) appended.
fn dashboard_url(base: &str, outcome: &InstallOutcome) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{base}{separator}shop={}",
        urlencoding::encode(outcome.shop.as_str())
    );
    if let Some(host) = &outcome.host {
        url.push_str("&host=");
        url.push_str(&urlencoding::encode(host));
    }
    url
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_interstitial_target_carries_host_once() {
        let target_url = "https://app.example.com/dashboard?shop=acme.myshopify.com&host=YWRtaW4".to_string();
        let page = InterstitialTemplate {
            api_key: "client-id".to_string(),
            target_json: js_string(&target_url),
            target_url,
            max_attempts: 3,
            retry_delay_ms: INTERSTITIAL_RETRY_DELAY_MS,
        };

        let html = page.render().unwrap();
        // Once in the fallback link, once in the script target.
        assert_eq!(html.matches("host=YWRtaW4").count(), 2);
        assert!(!html.contains("\"host=\""));
    }

    #[test]
    fn test_js_string_escapes_script_close() {
        assert_eq!(js_string("a</script>b"), r#""a<\/script>b""#);
        assert_eq!(js_string("say \"hi\""), r#""say \"hi\"""#);
    }
}

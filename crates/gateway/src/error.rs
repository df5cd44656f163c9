//! Unified error handling with Sentry integration.
//!
//! [`AppError`] renders as a minimal JSON envelope, which is what webhook
//! callers see. Browser-facing routes wrap it in [`PageError`] to render the
//! plain error page instead. Server errors are captured to Sentry before
//! responding.

use askama::Template;
use axum::{
    Json,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde_json::json;
use shopgate_core::ShopDomain;
use thiserror::Error;

use crate::db::{QueueError, RepositoryError};
use crate::services::installation::InstallError;
use crate::shopify::ShopifyError;

/// Application-level error type for the gateway.
#[derive(Debug, Error)]
pub enum AppError {
    /// Webhook signature did not verify.
    #[error("Webhook signature is invalid")]
    SignatureInvalid,

    /// OAuth callback signature did not verify.
    #[error("Callback signature is invalid")]
    CallbackSignatureInvalid,

    /// A required parameter or header is absent.
    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    /// A parameter is present but malformed.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The platform redirected back with an error instead of a code.
    #[error("Installation was not authorized: {0}")]
    PlatformDenied(String),

    /// Exchanging the authorization code failed.
    #[error("Token exchange failed: {0}")]
    UpstreamTokenExchangeFailure(#[source] ShopifyError),

    /// No credential exists for the shop named by a data request.
    #[error("Store not found: {0}")]
    StoreNotFound(ShopDomain),

    /// The job queue rejected a verified webhook.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(#[from] QueueError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::SignatureInvalid => StatusCode::UNAUTHORIZED,
            Self::CallbackSignatureInvalid => StatusCode::FORBIDDEN,
            Self::MissingParameter(_) | Self::InvalidParameter(_) | Self::PlatformDenied(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::StoreNotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamTokenExchangeFailure(_)
            | Self::QueueUnavailable(_)
            | Self::Database(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SignatureInvalid | Self::CallbackSignatureInvalid => "signature_invalid",
            Self::MissingParameter(_) => "missing_parameter",
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::PlatformDenied(_) => "platform_denied",
            Self::UpstreamTokenExchangeFailure(_) => "upstream_token_exchange_failure",
            Self::StoreNotFound(_) => "store_not_found",
            Self::QueueUnavailable(_) => "queue_unavailable",
            Self::Database(_) | Self::Internal(_) => "internal",
        }
    }

    /// Message safe to show to a browser user.
    fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) | Self::QueueUnavailable(_) => {
                "Something went wrong on our side. Please try again.".to_string()
            }
            Self::UpstreamTokenExchangeFailure(_) => {
                "We could not complete the connection to your store. Please restart the installation."
                    .to_string()
            }
            Self::SignatureInvalid | Self::CallbackSignatureInvalid => {
                "The request could not be verified. Please restart the installation.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Capture server errors to Sentry.
    fn report(&self) {
        if self.status().is_server_error() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                kind = self.kind(),
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, kind = self.kind(), "Request rejected");
        }
    }
}

impl From<InstallError> for AppError {
    fn from(err: InstallError) -> Self {
        match err {
            InstallError::MissingParameter(name) => Self::MissingParameter(name),
            InstallError::InvalidShop(e) => Self::InvalidParameter(format!("shop: {e}")),
            InstallError::SignatureInvalid => Self::CallbackSignatureInvalid,
            InstallError::PlatformDenied(reason) => Self::PlatformDenied(reason),
            InstallError::TokenExchange(e) => Self::UpstreamTokenExchangeFailure(e),
            InstallError::Persistence(e) => Self::Database(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.report();
        let status = self.status();
        let body = json!({ "status": "error", "error": self.kind() });
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Browser error page
// =============================================================================

/// Plain error page shown to merchants.
#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    /// HTTP status code.
    pub status_code: u16,
    /// Short heading.
    pub title: String,
    /// Explanation.
    pub message: String,
}

/// An [`AppError`] rendered as an HTML page.
#[derive(Debug)]
pub struct PageError(pub AppError);

impl From<AppError> for PageError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<InstallError> for PageError {
    fn from(err: InstallError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let err = self.0;
        err.report();

        let status = err.status();
        let template = ErrorTemplate {
            status_code: status.as_u16(),
            title: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message: err.public_message(),
        };

        match template.render() {
            Ok(html) => (status, Html(html)).into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to render error page");
                (status, err.public_message()).into_response()
            }
        }
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the nowplaying-auth service.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // ── Credential Errors ───────────────────────────────────────────────
    #[error("{0} not found")]
    NotFound(String),

    /// The credential has no usable upstream grant. Refreshing cannot fix it.
    #[error("No usable upstream grant, re-authorization required")]
    Unauthenticated,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    // ── Upstream Errors ─────────────────────────────────────────────────
    #[error("Rate limited by upstream, retry after {}s", retry_after_secs(.retry_after))]
    RateLimited { retry_after: Duration },

    #[error("Upstream request failed (status {status:?}): {body}")]
    Upstream { status: Option<u16>, body: String },

    // ── Session Errors ──────────────────────────────────────────────────
    #[error("Authentication required")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid state parameter")]
    InvalidState,

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(String),

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code, shared by JSON responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::NotFound(_) => "not_found",
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::RefreshFailed(_) => "refresh_failed",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::Upstream { .. } => "upstream_error",
            AuthError::Unauthorized => "unauthorized",
            AuthError::BadRequest(_) => "bad_request",
            AuthError::InvalidState => "invalid_state",
            AuthError::Database(_) => "database_error",
            AuthError::CryptoError(_) => "crypto_error",
            AuthError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Unauthenticated => StatusCode::FORBIDDEN,
            AuthError::RefreshFailed(_) => StatusCode::BAD_GATEWAY,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidState => StatusCode::BAD_REQUEST,
            AuthError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::CryptoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Whole seconds a caller should wait, rounded up so a sub-second cooldown
/// is never advertised as zero.
pub fn retry_after_secs(retry_after: &Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        AuthError::Database(e.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(e: anyhow::Error) -> Self {
        AuthError::Internal(e.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Upstream and storage details stay in the logs.
        let message = match &self {
            AuthError::Upstream { .. } => "Upstream request failed".to_string(),
            AuthError::Database(_) | AuthError::CryptoError(_) | AuthError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let AuthError::RateLimited { retry_after } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(retry_after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

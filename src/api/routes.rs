//! API route handlers.
//!
//! All handlers receive `SharedState` via Axum state extraction. Dashboard
//! routes authenticate with the session JWT; the overlay and `/current`
//! routes are keyed by a public token in the path.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use crate::auth::{bearer_token, clear_state_cookie, state_cookie, verify_state_cookie};
use crate::credentials::tokens::generate_state_nonce;
use crate::credentials::FetchMode;
use crate::error::{retry_after_secs, AuthError};
use crate::providers::PlaybackSnapshot;
use crate::store::{Credential, PublicTokenKind};
use crate::SharedState;

// =============================================================================
// Routers
// =============================================================================

pub fn public_router() -> Router<SharedState> {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── Login ────────────────────────────────────────────────────────
        .route("/auth/redirect", get(auth_redirect))
        .route("/auth/callback", get(auth_callback))
        // ── Plaintext API ────────────────────────────────────────────────
        .route("/current/{api_token}", get(current))
}

pub fn v1_router() -> Router<SharedState> {
    Router::new()
        // ── Dashboard ────────────────────────────────────────────────────
        .route("/me", get(me))
        .route("/me/reset-token", post(reset_token))
        // ── Overlay ──────────────────────────────────────────────────────
        .route("/overlay/{overlay_token}/token", get(overlay_token))
}

// =============================================================================
// Health
// =============================================================================

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "nowplaying-auth",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// Login
// =============================================================================

/// GET /auth/redirect: send the browser to the Spotify consent screen.
async fn auth_redirect(State(state): State<SharedState>) -> Result<Response, AuthError> {
    let signed_state = state
        .crypto
        .issue_state(&generate_state_nonce(), Utc::now().timestamp())?;

    Ok((
        [(header::SET_COOKIE, state_cookie(&signed_state))],
        Redirect::temporary(&state.provider.auth_url(&signed_state)),
    )
        .into_response())
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /auth/callback: store the grant and start a session.
async fn auth_callback(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(q): Query<CallbackQuery>,
) -> Result<Response, AuthError> {
    if let Some(reason) = q.error {
        warn!(reason = %reason, "authorization denied by user or provider");
        return Err(AuthError::BadRequest(format!("authorization failed: {reason}")));
    }

    let signed_state = q.state.ok_or(AuthError::InvalidState)?;
    state
        .crypto
        .verify_state(&signed_state, Utc::now().timestamp())?;
    verify_state_cookie(&headers, &signed_state)?;

    let code = q
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::BadRequest("missing code".into()))?;

    let tokens = state.provider.exchange_code(&code).await?;
    let profile = state.provider.fetch_profile(&tokens.access_token).await?;
    let credential = state.credentials.upsert_from_oauth(profile, tokens).await?;

    let session = state.sessions.cookie(credential.id)?;
    let home = format!("{}/", state.config.base_url.trim_end_matches('/'));
    Ok((
        AppendHeaders([
            (header::SET_COOKIE, session),
            (header::SET_COOKIE, clear_state_cookie()),
        ]),
        Redirect::temporary(&home),
    )
        .into_response())
}

// =============================================================================
// Dashboard
// =============================================================================

#[derive(Debug, Serialize)]
struct UserView {
    id: Uuid,
    name: String,
    avatar: Option<String>,
    api_token: String,
    overlay_token: String,
}

impl From<&Credential> for UserView {
    fn from(c: &Credential) -> Self {
        Self {
            id: c.id,
            name: c.display_name.clone(),
            avatar: c.avatar_url.clone(),
            api_token: c.public_api_token.clone(),
            overlay_token: c.public_overlay_token.clone(),
        }
    }
}

/// Load the credential behind the session. A session for a credential that
/// no longer resolves is treated as no session.
async fn session_credential(
    state: &SharedState,
    headers: &HeaderMap,
    mode: FetchMode,
) -> Result<Credential, AuthError> {
    let id = state.sessions.verify(bearer_token(headers)?)?;
    match state.credentials.find_by_id(id, mode).await {
        Err(AuthError::NotFound(_)) => Err(AuthError::Unauthorized),
        other => other,
    }
}

/// GET /v1/me
async fn me(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<UserView>, AuthError> {
    let credential = session_credential(&state, &headers, FetchMode::Cached).await?;
    Ok(Json(UserView::from(&credential)))
}

#[derive(Deserialize)]
struct ResetTokenBody {
    #[serde(rename = "type")]
    kind: PublicTokenKind,
}

/// POST /v1/me/reset-token: rotate one public token.
async fn reset_token(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<ResetTokenBody>,
) -> Result<Json<UserView>, AuthError> {
    let credential = session_credential(&state, &headers, FetchMode::BypassCache).await?;
    let rotated = state
        .credentials
        .rotate_public_token(&credential, body.kind)
        .await?;
    Ok(Json(UserView::from(&rotated)))
}

// =============================================================================
// Overlay
// =============================================================================

#[derive(Debug, Serialize)]
struct OverlayToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

/// GET /v1/overlay/{overlay_token}/token: a usable access token for the widget.
async fn overlay_token(
    State(state): State<SharedState>,
    Path(overlay_token): Path<String>,
) -> Result<Json<OverlayToken>, AuthError> {
    let credential = state
        .credentials
        .resolve_by_public_token(PublicTokenKind::Overlay, &overlay_token)
        .await?;
    let valid = state.credentials.ensure_valid(&credential).await?;

    Ok(Json(OverlayToken {
        access_token: valid.access_token.ok_or(AuthError::Unauthenticated)?,
        expires_at: valid.access_token_expires_at,
    }))
}

// =============================================================================
// Plaintext API
// =============================================================================

const NOTHING_PLAYING: &str = "No song playing.";

#[derive(Deserialize)]
struct CurrentQuery {
    #[serde(rename = "type")]
    format: Option<String>,
}

/// GET /current/{api_token}[?type=json]
///
/// Built for chat bots, so every outcome is a short human-readable message.
async fn current(
    State(state): State<SharedState>,
    Path(api_token): Path<String>,
    Query(q): Query<CurrentQuery>,
) -> Response {
    let as_json = q.format.as_deref() == Some("json");

    let result = match state
        .credentials
        .resolve_by_public_token(PublicTokenKind::Api, &api_token)
        .await
    {
        Ok(credential) => state.credentials.now_playing(&credential).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(snapshot) => render_playing(snapshot, as_json),
        Err(e) => render_failure(e, as_json),
    }
}

fn render_playing(snapshot: Option<PlaybackSnapshot>, as_json: bool) -> Response {
    let message = snapshot
        .as_ref()
        .map(PlaybackSnapshot::message)
        .unwrap_or_else(|| NOTHING_PLAYING.to_string());

    if as_json {
        Json(json!({ "data": snapshot, "message": message })).into_response()
    } else {
        message.into_response()
    }
}

/// Status and message shown to `/current` callers for each failure.
fn current_failure(e: &AuthError) -> (StatusCode, &'static str) {
    match e {
        AuthError::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
        AuthError::Unauthenticated => (
            StatusCode::FORBIDDEN,
            "Invalid Spotify credentials. Please re-login to the service.",
        ),
        AuthError::RefreshFailed(_) => (
            StatusCode::BAD_REQUEST,
            "Unable to verify Spotify credentials, please try again later.",
        ),
        AuthError::RateLimited { .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            "Spotify is blocking us from requesting your data, please try again later.",
        ),
        AuthError::Upstream { .. } => (
            StatusCode::BAD_REQUEST,
            "Failed to get Song from Spotify API, please try again later.",
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Something went wrong, please try again later.",
        ),
    }
}

fn render_failure(e: AuthError, as_json: bool) -> Response {
    let (status, message) = current_failure(&e);
    if status.is_server_error() {
        error!(error = %e, "now-playing lookup failed");
    }

    let mut response = if as_json {
        (status, Json(json!({ "error": message }))).into_response()
    } else {
        (status, message).into_response()
    };

    if let AuthError::RateLimited { retry_after } = &e {
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs(retry_after).to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

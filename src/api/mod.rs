//! HTTP router for nowplaying-auth.
//!
//! - /status                            Health check
//! - /auth/redirect, /auth/callback     Spotify login
//! - /v1/me, /v1/me/reset-token         Dashboard (session JWT)
//! - /v1/overlay/{overlay_token}/token  Overlay widget
//! - /current/{api_token}               Plaintext / JSON now-playing API

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::public_router())
        .nest("/v1", routes::v1_router())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

//! Binds an OAuth `state` to the browser that started the login.
//!
//! `/auth/redirect` stores a SHA-256 digest of the signed state in a short
//! lived cookie; `/auth/callback` only accepts a state whose digest matches.

use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::crypto::engine::STATE_MAX_AGE_SECS;
use crate::error::AuthError;

pub const STATE_COOKIE: &str = "oauth_state";

fn digest(signed_state: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(signed_state.as_bytes()))
}

/// `Set-Cookie` value for a freshly issued state.
pub fn state_cookie(signed_state: &str) -> String {
    format!(
        "{STATE_COOKIE}={}; Path=/auth; Max-Age={STATE_MAX_AGE_SECS}; HttpOnly; SameSite=Lax",
        digest(signed_state)
    )
}

/// `Set-Cookie` value that drops the state cookie once it has been used.
pub fn clear_state_cookie() -> String {
    format!("{STATE_COOKIE}=; Path=/auth; Max-Age=0; HttpOnly; SameSite=Lax")
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

/// Check that the request carries the cookie set for `signed_state`.
pub fn verify_state_cookie(headers: &HeaderMap, signed_state: &str) -> Result<(), AuthError> {
    match cookie_value(headers, STATE_COOKIE) {
        Some(value) if value == digest(signed_state) => Ok(()),
        Some(_) => {
            tracing::warn!("oauth state does not match the browser's state cookie");
            Err(AuthError::InvalidState)
        }
        None => {
            tracing::warn!("oauth callback without a state cookie");
            Err(AuthError::InvalidState)
        }
    }
}

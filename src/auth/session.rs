//! Session tokens for the account dashboard.
//!
//! A session is an HS256 JWT whose subject is the credential id. It is set as
//! a cookie after the OAuth callback and sent back as a Bearer token.

use axum::http::{header, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;

/// Session lifetime, also used as the cookie `Max-Age`.
pub const SESSION_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct SessionSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SessionSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, credential_id: Uuid) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: credential_id.to_string(),
            iat: now,
            exp: now + SESSION_TTL_SECS,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::CryptoError(format!("session signing failed: {e}")))
    }

    /// Validate a session token and return the credential id it names.
    pub fn verify(&self, token: &str) -> Result<Uuid, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!("session rejected: {e}");
            AuthError::Unauthorized
        })?;
        Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::Unauthorized)
    }

    /// `Set-Cookie` value carrying a fresh session.
    pub fn cookie(&self, credential_id: Uuid) -> Result<String, AuthError> {
        let token = self.issue(credential_id)?;
        Ok(format!("session={token}; Path=/; Max-Age={SESSION_TTL_SECS}"))
    }
}

/// Pull the session token out of `Authorization: Bearer <jwt>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Unauthorized)
}

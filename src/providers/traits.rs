use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Tokens returned from an OAuth provider after code exchange or refresh.
///
/// Refresh responses may omit fields that did not change, so everything but
/// the access token is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

impl TokenSet {
    /// Granted scopes, in the order the provider listed them.
    pub fn scopes(&self) -> Option<Vec<String>> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
    }

    /// Absolute expiry for `expires_in`. A lifetime too large to represent
    /// is treated as not returned.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.expires_in?).ok()?;
        now.checked_add_signed(chrono::Duration::try_seconds(secs)?)
    }
}

/// The provider-side identity behind a fresh grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Token endpoint operations for the upstream provider.
///
/// Any non-success answer is an [`AuthError::Upstream`] carrying the status
/// and raw body. Implementations never retry.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Unique provider identifier (e.g., "spotify").
    fn id(&self) -> &str;

    /// Authorization URL the user is redirected to.
    fn auth_url(&self, state: &str) -> String;

    /// Exchange an authorization code for a token pair.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, AuthError>;

    /// Exchange a refresh token for a new access token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;

    /// Look up the account the access token belongs to.
    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, AuthError>;
}

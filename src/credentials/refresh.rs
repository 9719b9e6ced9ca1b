//! Keeps a credential's access token usable.
//!
//! There is no per-credential lock. Two requests that both see an expiring
//! token both refresh it and the last write wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::cache::{CacheKey, CredentialCache, FetchMode};
use crate::error::AuthError;
use crate::providers::OAuthProvider;
use crate::store::{Credential, CredentialUpdate};

/// A token closer than this to expiry is refreshed before use.
pub const REFRESH_GRACE: Duration = Duration::from_secs(5);

pub struct TokenRefresher {
    cache: Arc<CredentialCache>,
    provider: Arc<dyn OAuthProvider>,
}

impl TokenRefresher {
    pub fn new(cache: Arc<CredentialCache>, provider: Arc<dyn OAuthProvider>) -> Self {
        Self { cache, provider }
    }

    /// Return `credential` as-is while its token has more than
    /// [`REFRESH_GRACE`] left, otherwise refresh it.
    pub async fn ensure_valid(&self, credential: &Credential) -> Result<Credential, AuthError> {
        if let Some(remaining) = credential.remaining_validity(Utc::now()) {
            if remaining > REFRESH_GRACE {
                return Ok(credential.clone());
            }
        }
        self.refresh(credential).await
    }

    /// Refresh unconditionally and return the persisted result.
    ///
    /// Fields the provider leaves out of its answer keep their stored value.
    /// On provider failure nothing is written.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let (Some(_), Some(refresh_token), Some(_)) = (
            credential.access_token.as_deref(),
            credential.refresh_token.as_deref(),
            credential.access_token_expires_at,
        ) else {
            debug!(credential_id = %credential.id, "credential has no usable grant");
            return Err(AuthError::Unauthenticated);
        };

        let tokens = self
            .provider
            .refresh_token(refresh_token)
            .await
            .map_err(|e| {
                warn!(
                    credential_id = %credential.id,
                    provider = self.provider.id(),
                    error = %e,
                    "token refresh failed"
                );
                AuthError::RefreshFailed(e.to_string())
            })?;

        let update = CredentialUpdate {
            access_token_expires_at: tokens.expires_at(Utc::now()),
            scopes: tokens.scopes(),
            refresh_token: tokens.refresh_token,
            access_token: Some(tokens.access_token),
            ..Default::default()
        };

        self.cache.store().update_fields(credential.id, &update).await?;
        self.cache.invalidate(credential).await;

        let refreshed = self
            .cache
            .get(&CacheKey::Id(credential.id), FetchMode::BypassCache)
            .await?
            .ok_or_else(|| {
                AuthError::Internal(format!("credential {} vanished after refresh", credential.id))
            })?;

        info!(credential_id = %credential.id, "access token refreshed");
        Ok(refreshed)
    }
}

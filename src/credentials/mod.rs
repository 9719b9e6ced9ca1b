//! Credential lifecycle: lookup by public token, refresh, rotation and the
//! playback read that ties them together.

pub mod cache;
pub mod refresh;
pub mod tokens;

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::AuthError;
use crate::providers::spotify::PLAYBACK_SCOPE;
use crate::providers::{OAuthProvider, PlaybackClient, PlaybackSnapshot, ProviderProfile, TokenSet};
use crate::store::{Credential, CredentialUpdate, CredentialUpsert, PublicTokenKind};

pub use cache::{CacheKey, CredentialCache, FetchMode};
pub use refresh::TokenRefresher;

/// Entry point for everything the HTTP layer does with credentials.
pub struct CredentialService {
    cache: Arc<CredentialCache>,
    refresher: TokenRefresher,
    playback: PlaybackClient,
}

impl CredentialService {
    pub fn new(
        cache: Arc<CredentialCache>,
        provider: Arc<dyn OAuthProvider>,
        playback: PlaybackClient,
    ) -> Self {
        Self {
            refresher: TokenRefresher::new(cache.clone(), provider),
            cache,
            playback,
        }
    }

    /// Look up the credential a public token belongs to.
    pub async fn resolve_by_public_token(
        &self,
        kind: PublicTokenKind,
        token: &str,
    ) -> Result<Credential, AuthError> {
        self.cache
            .get(&CacheKey::for_public_token(kind, token), FetchMode::Cached)
            .await?
            .ok_or_else(|| AuthError::NotFound("credential".into()))
    }

    pub async fn find_by_id(&self, id: Uuid, mode: FetchMode) -> Result<Credential, AuthError> {
        self.cache
            .get(&CacheKey::Id(id), mode)
            .await?
            .ok_or_else(|| AuthError::NotFound("credential".into()))
    }

    pub async fn ensure_valid(&self, credential: &Credential) -> Result<Credential, AuthError> {
        self.refresher.ensure_valid(credential).await
    }

    /// Replace one public token. The other one is left alone and the old
    /// value stops resolving immediately.
    pub async fn rotate_public_token(
        &self,
        credential: &Credential,
        kind: PublicTokenKind,
    ) -> Result<Credential, AuthError> {
        let token = tokens::generate_public_token(kind);
        self.cache
            .store()
            .update_fields(credential.id, &CredentialUpdate::public_token(kind, token))
            .await?;
        self.cache.invalidate(credential).await;

        info!(credential_id = %credential.id, kind = kind.as_str(), "public token rotated");

        self.cache
            .get(&CacheKey::Id(credential.id), FetchMode::BypassCache)
            .await?
            .ok_or_else(|| {
                AuthError::Internal(format!("credential {} vanished after rotation", credential.id))
            })
    }

    /// Store the grant from a completed authorization, creating the
    /// credential on first login.
    pub async fn upsert_from_oauth(
        &self,
        profile: ProviderProfile,
        tokens: TokenSet,
    ) -> Result<Credential, AuthError> {
        let upsert = CredentialUpsert {
            external_account_id: profile.id,
            display_name: profile.display_name,
            avatar_url: profile.avatar_url,
            scopes: tokens
                .scopes()
                .unwrap_or_else(|| vec![PLAYBACK_SCOPE.to_string()]),
            access_token_expires_at: tokens.expires_at(Utc::now()),
            refresh_token: tokens.refresh_token,
            access_token: tokens.access_token,
        };

        let credential = self.cache.store().upsert_by_external_account_id(&upsert).await?;
        self.cache.invalidate(&credential).await;

        info!(
            credential_id = %credential.id,
            external_account_id = %credential.external_account_id,
            "credential stored from authorization"
        );
        Ok(credential)
    }

    /// What the credential's owner is playing right now.
    ///
    /// If the provider rejects a token we considered valid, the token is
    /// refreshed once and the read retried once.
    pub async fn now_playing(
        &self,
        credential: &Credential,
    ) -> Result<Option<PlaybackSnapshot>, AuthError> {
        let credential = self.refresher.ensure_valid(credential).await?;

        match self
            .playback
            .fetch_currently_playing(access_token(&credential)?)
            .await
        {
            Err(AuthError::Unauthenticated) => {
                info!(credential_id = %credential.id, "access token rejected, forcing refresh");
                let refreshed = self.refresher.refresh(&credential).await?;
                self.playback
                    .fetch_currently_playing(access_token(&refreshed)?)
                    .await
            }
            other => other,
        }
    }
}

fn access_token(credential: &Credential) -> Result<&str, AuthError> {
    credential
        .access_token
        .as_deref()
        .ok_or(AuthError::Unauthenticated)
}

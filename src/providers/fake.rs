//! Scripted provider for tests. Counts refresh calls so tests can assert how
//! many times the token endpoint would have been hit.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::traits::{OAuthProvider, ProviderProfile, TokenSet};
use crate::error::AuthError;

pub(crate) struct FakeProvider {
    tokens: Option<TokenSet>,
    refresh_calls: AtomicUsize,
}

impl FakeProvider {
    /// Every refresh and exchange answers with `tokens`.
    pub(crate) fn returning(tokens: TokenSet) -> Self {
        Self {
            tokens: Some(tokens),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    /// Every refresh and exchange fails with `invalid_grant`.
    pub(crate) fn failing() -> Self {
        Self {
            tokens: None,
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn answer(&self) -> Result<TokenSet, AuthError> {
        self.tokens.clone().ok_or_else(|| AuthError::Upstream {
            status: Some(400),
            body: r#"{"error":"invalid_grant"}"#.into(),
        })
    }
}

#[async_trait]
impl OAuthProvider for FakeProvider {
    fn id(&self) -> &str {
        "fake"
    }

    fn auth_url(&self, state: &str) -> String {
        format!("https://accounts.test/authorize?state={state}")
    }

    async fn exchange_code(&self, _code: &str) -> Result<TokenSet, AuthError> {
        self.answer()
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenSet, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.answer()
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<ProviderProfile, AuthError> {
        Ok(ProviderProfile {
            id: "listener".into(),
            display_name: "Listener".into(),
            avatar_url: None,
        })
    }
}

pub(crate) fn token_set(
    access_token: &str,
    refresh_token: Option<&str>,
    expires_in: Option<u64>,
) -> TokenSet {
    TokenSet {
        access_token: access_token.into(),
        refresh_token: refresh_token.map(str::to_string),
        token_type: Some("Bearer".into()),
        expires_in,
        scope: None,
    }
}

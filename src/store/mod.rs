//! Credential store, the durable source of truth for one record per external account.
//!
//! The service only talks to [`CredentialStore`]; the PostgreSQL backend in
//! [`db`] is the production implementation.

pub mod db;
#[cfg(test)]
pub(crate) mod memory;

pub use db::PgCredentialStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AuthError;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Credential>, AuthError>;

    async fn find_by_api_token(&self, token: &str) -> Result<Option<Credential>, AuthError>;

    async fn find_by_overlay_token(&self, token: &str) -> Result<Option<Credential>, AuthError>;

    /// Insert a credential, or update the grant of the one already holding
    /// `external_account_id`. New rows get a fresh id and fresh public tokens;
    /// existing rows keep theirs.
    async fn upsert_by_external_account_id(
        &self,
        upsert: &CredentialUpsert,
    ) -> Result<Credential, AuthError>;

    /// Apply a partial update. Fields left as `None` are not touched.
    /// `updated_at` moves only when the grant changes; a public token
    /// rotation leaves every other column as it was.
    async fn update_fields(&self, id: Uuid, update: &CredentialUpdate) -> Result<(), AuthError>;
}

// ── Types ────────────────────────────────────────────────────────────────────

/// One external account's grant, public tokens and token state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: Uuid,
    pub external_account_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub public_api_token: String,
    pub public_overlay_token: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Time the access token stays usable after `now`, if it is present and
    /// not yet expired.
    pub fn remaining_validity(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.access_token.as_ref()?;
        let expires_at = self.access_token_expires_at?;
        (expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

/// Which public token a caller presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum PublicTokenKind {
    #[serde(rename = "api_token", alias = "apiToken")]
    Api,
    #[serde(rename = "overlay_token", alias = "overlayToken")]
    Overlay,
}

impl PublicTokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicTokenKind::Api => "api_token",
            PublicTokenKind::Overlay => "overlay_token",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialUpsert {
    pub external_account_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
}

/// Partial update; only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub public_api_token: Option<String>,
    pub public_overlay_token: Option<String>,
}

impl CredentialUpdate {
    /// Whether any upstream grant field is set.
    pub fn touches_grant(&self) -> bool {
        self.access_token.is_some()
            || self.refresh_token.is_some()
            || self.scopes.is_some()
            || self.access_token_expires_at.is_some()
    }

    pub fn public_token(kind: PublicTokenKind, token: String) -> Self {
        match kind {
            PublicTokenKind::Api => Self {
                public_api_token: Some(token),
                ..Default::default()
            },
            PublicTokenKind::Overlay => Self {
                public_overlay_token: Some(token),
                ..Default::default()
            },
        }
    }
}

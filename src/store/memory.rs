//! In-memory credential store for tests. Enforces the same uniqueness rules
//! as the `credentials` table and counts reads so tests can tell cache hits
//! from store round-trips.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Credential, CredentialStore, CredentialUpdate, CredentialUpsert, PublicTokenKind};
use crate::credentials::tokens::generate_public_token;
use crate::error::AuthError;

#[derive(Default)]
pub(crate) struct MemoryCredentialStore {
    rows: Mutex<HashMap<Uuid, Credential>>,
    reads: AtomicUsize,
}

impl MemoryCredentialStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of `find_*` calls served so far.
    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Insert a fully formed row, bypassing upsert rules.
    pub(crate) async fn insert(&self, credential: Credential) {
        self.rows.lock().await.insert(credential.id, credential);
    }

    pub(crate) async fn find_by_external(&self, external_account_id: &str) -> Option<Credential> {
        self.find_where(|c| c.external_account_id == external_account_id)
            .await
    }

    async fn find_where(&self, pred: impl Fn(&Credential) -> bool) -> Option<Credential> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().await.values().find(|c| pred(c)).cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Credential>, AuthError> {
        Ok(self.find_where(|c| c.id == id).await)
    }

    async fn find_by_api_token(&self, token: &str) -> Result<Option<Credential>, AuthError> {
        Ok(self.find_where(|c| c.public_api_token == token).await)
    }

    async fn find_by_overlay_token(&self, token: &str) -> Result<Option<Credential>, AuthError> {
        Ok(self.find_where(|c| c.public_overlay_token == token).await)
    }

    async fn upsert_by_external_account_id(
        &self,
        upsert: &CredentialUpsert,
    ) -> Result<Credential, AuthError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;

        if let Some(existing) = rows
            .values_mut()
            .find(|c| c.external_account_id == upsert.external_account_id)
        {
            existing.display_name = upsert.display_name.clone();
            existing.avatar_url = upsert.avatar_url.clone();
            existing.access_token = Some(upsert.access_token.clone());
            if upsert.refresh_token.is_some() {
                existing.refresh_token = upsert.refresh_token.clone();
            }
            existing.scopes = upsert.scopes.clone();
            existing.access_token_expires_at = upsert.access_token_expires_at;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let credential = Credential {
            id: Uuid::new_v4(),
            external_account_id: upsert.external_account_id.clone(),
            display_name: upsert.display_name.clone(),
            avatar_url: upsert.avatar_url.clone(),
            public_api_token: generate_public_token(PublicTokenKind::Api),
            public_overlay_token: generate_public_token(PublicTokenKind::Overlay),
            access_token: Some(upsert.access_token.clone()),
            refresh_token: upsert.refresh_token.clone(),
            scopes: upsert.scopes.clone(),
            access_token_expires_at: upsert.access_token_expires_at,
            created_at: now,
            updated_at: now,
        };
        rows.insert(credential.id, credential.clone());
        Ok(credential)
    }

    async fn update_fields(&self, id: Uuid, update: &CredentialUpdate) -> Result<(), AuthError> {
        let mut rows = self.rows.lock().await;

        let clashes = |c: &Credential| {
            c.id != id
                && (update.public_api_token.as_deref() == Some(c.public_api_token.as_str())
                    || update.public_overlay_token.as_deref()
                        == Some(c.public_overlay_token.as_str()))
        };
        if rows.values().any(clashes) {
            return Err(AuthError::Database("duplicate public token".into()));
        }

        let credential = rows
            .get_mut(&id)
            .ok_or_else(|| AuthError::NotFound("credential".into()))?;

        if let Some(v) = &update.access_token {
            credential.access_token = Some(v.clone());
        }
        if let Some(v) = &update.refresh_token {
            credential.refresh_token = Some(v.clone());
        }
        if let Some(v) = &update.scopes {
            credential.scopes = v.clone();
        }
        if let Some(v) = update.access_token_expires_at {
            credential.access_token_expires_at = Some(v);
        }
        if let Some(v) = &update.public_api_token {
            credential.public_api_token = v.clone();
        }
        if let Some(v) = &update.public_overlay_token {
            credential.public_overlay_token = v.clone();
        }
        if update.touches_grant() {
            credential.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// A credential with a grant valid for `expires_in_secs` (negative for expired).
pub(crate) fn sample_credential(expires_in_secs: i64) -> Credential {
    let now = Utc::now();
    Credential {
        id: Uuid::new_v4(),
        external_account_id: format!("spotify-{}", Uuid::new_v4()),
        display_name: "Test Listener".into(),
        avatar_url: None,
        public_api_token: generate_public_token(PublicTokenKind::Api),
        public_overlay_token: generate_public_token(PublicTokenKind::Overlay),
        access_token: Some("access-old".into()),
        refresh_token: Some("refresh-old".into()),
        scopes: vec!["user-read-currently-playing".into()],
        access_token_expires_at: Some(now + chrono::Duration::seconds(expires_in_secs)),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(external: &str, access: &str) -> CredentialUpsert {
        CredentialUpsert {
            external_account_id: external.into(),
            display_name: "Listener".into(),
            avatar_url: None,
            access_token: access.into(),
            refresh_token: Some("refresh".into()),
            scopes: vec!["user-read-currently-playing".into()],
            access_token_expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_identity_for_existing_account() {
        let store = MemoryCredentialStore::new();
        let first = store
            .upsert_by_external_account_id(&upsert("acct-1", "a1"))
            .await
            .unwrap();
        let second = store
            .upsert_by_external_account_id(&upsert("acct-1", "a2"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.public_api_token, second.public_api_token);
        assert_eq!(first.public_overlay_token, second.public_overlay_token);
        assert_eq!(second.access_token.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_update_fields_leaves_absent_fields() {
        let store = MemoryCredentialStore::new();
        let credential = sample_credential(3600);
        store.insert(credential.clone()).await;

        let update = CredentialUpdate {
            access_token: Some("access-new".into()),
            ..Default::default()
        };
        store.update_fields(credential.id, &update).await.unwrap();

        let stored = store.find_by_id(credential.id).await.unwrap().unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("access-new"));
        assert_eq!(stored.refresh_token, credential.refresh_token);
        assert_eq!(stored.scopes, credential.scopes);
        assert_eq!(stored.access_token_expires_at, credential.access_token_expires_at);
    }

    #[tokio::test]
    async fn test_token_rotation_keeps_updated_at() {
        let store = MemoryCredentialStore::new();
        let credential = sample_credential(3600);
        store.insert(credential.clone()).await;

        let update = CredentialUpdate::public_token(PublicTokenKind::Overlay, "np_ovl_new".into());
        store.update_fields(credential.id, &update).await.unwrap();

        let stored = store.find_by_id(credential.id).await.unwrap().unwrap();
        assert_eq!(stored.updated_at, credential.updated_at);
        assert_eq!(stored.public_overlay_token, "np_ovl_new");
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let store = MemoryCredentialStore::new();
        let err = store
            .update_fields(Uuid::new_v4(), &CredentialUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }
}

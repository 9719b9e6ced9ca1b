//! PostgreSQL-backed credential store.
//!
//! Table `credentials`: one row per external account. Provider tokens are
//! stored encrypted (AES-256-GCM, see [`CryptoEngine`]).

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::{Credential, CredentialStore, CredentialUpdate, CredentialUpsert, PublicTokenKind};
use crate::credentials::tokens::generate_public_token;
use crate::crypto::CryptoEngine;
use crate::error::AuthError;

const CREDENTIAL_COLUMNS: &str = r#"
    id, external_account_id, display_name, avatar_url,
    public_api_token, public_overlay_token,
    access_token, refresh_token, scopes, access_token_expires_at,
    created_at, updated_at
"#;

/// Credential store backed by PostgreSQL.
pub struct PgCredentialStore {
    pool: PgPool,
    crypto: Arc<CryptoEngine>,
}

impl PgCredentialStore {
    pub async fn new(
        db_url: &str,
        max_connections: u32,
        crypto: Arc<CryptoEngine>,
    ) -> Result<Self, AuthError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .map_err(|e| AuthError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool, crypto })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id                      UUID PRIMARY KEY,
                external_account_id     TEXT NOT NULL UNIQUE,
                display_name            TEXT NOT NULL DEFAULT '',
                avatar_url              TEXT,
                public_api_token        TEXT NOT NULL UNIQUE,
                public_overlay_token    TEXT NOT NULL UNIQUE,
                access_token            TEXT,
                refresh_token           TEXT,
                scopes                  TEXT[] NOT NULL DEFAULT '{}',
                access_token_expires_at TIMESTAMPTZ,
                created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<Credential>, AuthError> {
        // `column` is always one of our own constants, never caller input.
        let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE {column} = $1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| self.decode(&r)).transpose()
    }

    fn decode(&self, row: &PgRow) -> Result<Credential, AuthError> {
        let enc_access: Option<String> = row.try_get("access_token")?;
        let enc_refresh: Option<String> = row.try_get("refresh_token")?;

        Ok(Credential {
            id: row.try_get("id")?,
            external_account_id: row.try_get("external_account_id")?,
            display_name: row.try_get("display_name")?,
            avatar_url: row.try_get("avatar_url")?,
            public_api_token: row.try_get("public_api_token")?,
            public_overlay_token: row.try_get("public_overlay_token")?,
            access_token: self.crypto.decrypt_opt(enc_access.as_deref())?,
            refresh_token: self.crypto.decrypt_opt(enc_refresh.as_deref())?,
            scopes: row.try_get("scopes")?,
            access_token_expires_at: row.try_get("access_token_expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Credential>, AuthError> {
        let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| self.decode(&r)).transpose()
    }

    async fn find_by_api_token(&self, token: &str) -> Result<Option<Credential>, AuthError> {
        self.find_one("public_api_token", token).await
    }

    async fn find_by_overlay_token(&self, token: &str) -> Result<Option<Credential>, AuthError> {
        self.find_one("public_overlay_token", token).await
    }

    async fn upsert_by_external_account_id(
        &self,
        upsert: &CredentialUpsert,
    ) -> Result<Credential, AuthError> {
        let enc_access = self.crypto.encrypt(&upsert.access_token)?;
        let enc_refresh = self.crypto.encrypt_opt(upsert.refresh_token.as_deref())?;

        // Fresh id and public tokens only land on insert; the conflict branch
        // leaves them alone.
        let sql = format!(
            r#"
            INSERT INTO credentials
                (id, external_account_id, display_name, avatar_url,
                 public_api_token, public_overlay_token,
                 access_token, refresh_token, scopes, access_token_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (external_account_id)
            DO UPDATE SET
                display_name = EXCLUDED.display_name,
                avatar_url = EXCLUDED.avatar_url,
                access_token = EXCLUDED.access_token,
                refresh_token = COALESCE(EXCLUDED.refresh_token, credentials.refresh_token),
                scopes = EXCLUDED.scopes,
                access_token_expires_at = EXCLUDED.access_token_expires_at,
                updated_at = NOW()
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&upsert.external_account_id)
            .bind(&upsert.display_name)
            .bind(&upsert.avatar_url)
            .bind(generate_public_token(PublicTokenKind::Api))
            .bind(generate_public_token(PublicTokenKind::Overlay))
            .bind(&enc_access)
            .bind(&enc_refresh)
            .bind(&upsert.scopes)
            .bind(upsert.access_token_expires_at)
            .fetch_one(&self.pool)
            .await?;

        self.decode(&row)
    }

    async fn update_fields(&self, id: Uuid, update: &CredentialUpdate) -> Result<(), AuthError> {
        let enc_access = self.crypto.encrypt_opt(update.access_token.as_deref())?;
        let enc_refresh = self.crypto.encrypt_opt(update.refresh_token.as_deref())?;

        let affected = sqlx::query(
            r#"
            UPDATE credentials
            SET access_token = COALESCE($1, access_token),
                refresh_token = COALESCE($2, refresh_token),
                scopes = COALESCE($3, scopes),
                access_token_expires_at = COALESCE($4, access_token_expires_at),
                public_api_token = COALESCE($5, public_api_token),
                public_overlay_token = COALESCE($6, public_overlay_token),
                updated_at = CASE WHEN $8 THEN NOW() ELSE updated_at END
            WHERE id = $7
            "#,
        )
        .bind(&enc_access)
        .bind(&enc_refresh)
        .bind(&update.scopes)
        .bind(update.access_token_expires_at)
        .bind(&update.public_api_token)
        .bind(&update.public_overlay_token)
        .bind(id)
        .bind(update.touches_grant())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(AuthError::NotFound("credential".into()));
        }

        Ok(())
    }
}

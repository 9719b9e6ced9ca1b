//! Three-key, TTL-aligned credential cache.
//!
//! Every credential is cached under `by-id`, `by-api-token` and
//! `by-overlay-token` at once. Entry lifetime follows the access token's own
//! expiry (minus [`EXPIRY_MARGIN`]) so a cached snapshot never outlives the
//! token it carries; a credential that needs a refresh is never cacheable.
//!
//! The cache is best effort. The store is always written first and backend
//! failures are logged, never returned.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::store::{Credential, CredentialStore, PublicTokenKind};

/// Subtracted from the remaining token lifetime when computing an entry TTL.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Id(Uuid),
    ApiToken(String),
    OverlayToken(String),
}

impl CacheKey {
    pub fn for_public_token(kind: PublicTokenKind, token: &str) -> Self {
        match kind {
            PublicTokenKind::Api => CacheKey::ApiToken(token.to_string()),
            PublicTokenKind::Overlay => CacheKey::OverlayToken(token.to_string()),
        }
    }

    fn all_for(credential: &Credential) -> [CacheKey; 3] {
        [
            CacheKey::Id(credential.id),
            CacheKey::ApiToken(credential.public_api_token.clone()),
            CacheKey::OverlayToken(credential.public_overlay_token.clone()),
        ]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Id(id) => write!(f, "by-id:{id}"),
            CacheKey::ApiToken(t) => write!(f, "by-api-token:{t}"),
            CacheKey::OverlayToken(t) => write!(f, "by-overlay-token:{t}"),
        }
    }
}

/// Whether a lookup may be served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Cached,
    /// Read the store directly. Used right after a write.
    BypassCache,
}

/// TTL for a credential snapshot, or `None` if it must not be cached.
pub fn cache_ttl(credential: &Credential, now: DateTime<Utc>) -> Option<Duration> {
    credential
        .remaining_validity(now)?
        .checked_sub(EXPIRY_MARGIN)
        .filter(|ttl| !ttl.is_zero())
}

/// Key/value backend with per-entry expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Credential>, AuthError>;

    async fn put(&self, key: CacheKey, value: Credential, ttl: Duration) -> Result<(), AuthError>;

    async fn delete(&self, key: &CacheKey) -> Result<(), AuthError>;
}

struct CacheEntry {
    credential: Credential,
    expires_at: Instant,
}

/// In-process backend. Expired entries are dropped when read and swept out
/// on every write, so idle credentials do not linger.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Credential>, AuthError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.credential.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn put(&self, key: CacheKey, value: Credential, ttl: Duration) -> Result<(), AuthError> {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.entries.insert(
            key,
            CacheEntry {
                credential: value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), AuthError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Credential lookups by any of the three keys, cached in front of the store.
pub struct CredentialCache {
    store: Arc<dyn CredentialStore>,
    backend: Arc<dyn CacheBackend>,
}

impl CredentialCache {
    pub fn new(store: Arc<dyn CredentialStore>, backend: Arc<dyn CacheBackend>) -> Self {
        Self { store, backend }
    }

    /// The durable store behind this cache. Writers go through it and then
    /// call [`invalidate`](Self::invalidate).
    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    pub async fn get(
        &self,
        key: &CacheKey,
        mode: FetchMode,
    ) -> Result<Option<Credential>, AuthError> {
        if mode == FetchMode::Cached {
            match self.backend.get(key).await {
                Ok(Some(credential)) => {
                    debug!(key = %key, "credential cache hit");
                    return Ok(Some(credential));
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "credential cache read failed"),
            }
        }

        let found = match key {
            CacheKey::Id(id) => self.store.find_by_id(*id).await?,
            CacheKey::ApiToken(token) => self.store.find_by_api_token(token).await?,
            CacheKey::OverlayToken(token) => self.store.find_by_overlay_token(token).await?,
        };

        if let Some(credential) = &found {
            self.put(credential).await;
        }

        Ok(found)
    }

    /// Cache a snapshot under all three keys. No-op for a credential whose
    /// access token is missing or about to expire.
    pub async fn put(&self, credential: &Credential) {
        let Some(ttl) = cache_ttl(credential, Utc::now()) else {
            debug!(credential_id = %credential.id, "credential not cacheable, skipping");
            return;
        };

        let [by_id, by_api, by_overlay] = CacheKey::all_for(credential);
        let results = tokio::join!(
            self.backend.put(by_id, credential.clone(), ttl),
            self.backend.put(by_api, credential.clone(), ttl),
            self.backend.put(by_overlay, credential.clone(), ttl),
        );

        for result in [results.0, results.1, results.2] {
            if let Err(e) = result {
                warn!(credential_id = %credential.id, error = %e, "credential cache write failed");
            }
        }
    }

    /// Drop all three keys for `credential`. Pass the snapshot as it was
    /// before the mutation so keys for rotated-out tokens go too.
    pub async fn invalidate(&self, credential: &Credential) {
        let [by_id, by_api, by_overlay] = CacheKey::all_for(credential);
        let results = tokio::join!(
            self.backend.delete(&by_id),
            self.backend.delete(&by_api),
            self.backend.delete(&by_overlay),
        );

        for result in [results.0, results.1, results.2] {
            if let Err(e) = result {
                warn!(credential_id = %credential.id, error = %e, "credential cache delete failed");
            }
        }
    }
}

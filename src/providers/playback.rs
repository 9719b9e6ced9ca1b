//! Rate-limited client for the "currently playing" endpoint.
//!
//! All requests share one [`RateLimitGate`]. When Spotify answers 429 the gate
//! closes for the advertised `Retry-After` and every caller fails fast until
//! it reopens. The upstream quota belongs to our client id, not to a user, so
//! one throttled account must not keep hammering it for everyone.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::spotify::{best_image, SpotifyImage};
use crate::error::AuthError;

/// Cooldown applied when a 429 carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Upper bound on any single cooldown.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Process-wide cooldown shared by every playback request.
#[derive(Debug, Default)]
pub struct RateLimitGate {
    blocked_until: RwLock<Option<Instant>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left on the current cooldown, if any.
    pub async fn remaining(&self) -> Option<Duration> {
        let blocked_until = (*self.blocked_until.read().await)?;
        let now = Instant::now();
        (now < blocked_until).then(|| blocked_until - now)
    }

    /// Fail with [`AuthError::RateLimited`] while the cooldown runs.
    pub async fn check(&self) -> Result<(), AuthError> {
        match self.remaining().await {
            Some(retry_after) => Err(AuthError::RateLimited { retry_after }),
            None => Ok(()),
        }
    }

    /// Close the gate for `retry_after`. An earlier deadline never shortens a
    /// later one already set.
    pub async fn block_for(&self, retry_after: Duration) {
        let now = Instant::now();
        let until = now
            .checked_add(retry_after.min(MAX_RETRY_AFTER))
            .unwrap_or(now + MAX_RETRY_AFTER);
        let mut blocked_until = self.blocked_until.write().await;
        if blocked_until.map_or(true, |current| current < until) {
            *blocked_until = Some(until);
        }
    }
}

/// Parse a `Retry-After` header: delta-seconds, then HTTP-date, else the default.
/// The result never exceeds [`MAX_RETRY_AFTER`].
pub fn parse_retry_after(value: Option<&HeaderValue>, now: SystemTime) -> Duration {
    let Some(raw) = value.and_then(|v| v.to_str().ok()).map(str::trim) else {
        return DEFAULT_RETRY_AFTER;
    };

    let parsed = if let Ok(secs) = raw.parse::<u64>() {
        Duration::from_secs(secs)
    } else {
        match httpdate::parse_http_date(raw) {
            Ok(at) => at.duration_since(now).unwrap_or(Duration::ZERO),
            Err(_) => DEFAULT_RETRY_AFTER,
        }
    };

    parsed.min(MAX_RETRY_AFTER)
}

/// What the user is listening to right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackSnapshot {
    pub artists: Vec<String>,
    pub title: String,
    pub album_art_url: Option<String>,
}

impl PlaybackSnapshot {
    /// `"Artist A, Artist B - Title"`, the plaintext API format.
    pub fn message(&self) -> String {
        if self.artists.is_empty() {
            return self.title.clone();
        }
        format!("{} - {}", self.artists.join(", "), self.title)
    }
}

#[derive(Debug, Deserialize)]
struct CurrentlyPlayingResponse {
    #[serde(default)]
    is_playing: bool,
    item: Option<PlayingItem>,
}

#[derive(Debug, Deserialize)]
struct PlayingItem {
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
    album: Option<Album>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Album {
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

impl CurrentlyPlayingResponse {
    fn into_snapshot(self) -> Option<PlaybackSnapshot> {
        if !self.is_playing {
            return None;
        }
        let item = self.item?;
        Some(PlaybackSnapshot {
            artists: item.artists.into_iter().map(|a| a.name).collect(),
            title: item.name,
            album_art_url: item
                .album
                .and_then(|a| best_image(&a.images).map(|i| i.url.clone())),
        })
    }
}

pub struct PlaybackClient {
    api_url: String,
    http: reqwest::Client,
    gate: Arc<RateLimitGate>,
}

impl PlaybackClient {
    pub fn new(api_url: String, gate: Arc<RateLimitGate>) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            gate,
        }
    }

    /// `Ok(None)` when nothing is playing.
    pub async fn fetch_currently_playing(
        &self,
        access_token: &str,
    ) -> Result<Option<PlaybackSnapshot>, AuthError> {
        self.gate.check().await?;

        let resp = self
            .http
            .get(format!("{}/v1/me/player/currently-playing", self.api_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Upstream {
                status: None,
                body: format!("playback request failed: {e}"),
            })?;

        let status = resp.status();
        match status {
            StatusCode::NO_CONTENT => return Ok(None),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(resp.headers().get(RETRY_AFTER), SystemTime::now());
                self.gate.block_for(retry_after).await;
                warn!(retry_after_secs = retry_after.as_secs(), "Spotify rate limit hit, gate closed");
                return Err(AuthError::RateLimited { retry_after });
            }
            StatusCode::UNAUTHORIZED => {
                debug!("Spotify rejected access token for playback");
                return Err(AuthError::Unauthenticated);
            }
            _ => {}
        }

        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "Spotify playback request failed");
            return Err(AuthError::Upstream {
                status: Some(status.as_u16()),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(None);
        }

        let playing: CurrentlyPlayingResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::Upstream {
                status: Some(status.as_u16()),
                body: format!("invalid playback response ({e}): {body}"),
            })?;

        Ok(playing.into_snapshot())
    }
}

use anyhow::{Context, Result};

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    /// Dashboard origin; the login callback redirects here.
    pub base_url: String,

    // ── Database ────────────────────────────────────────────────────────
    pub database_url: String,
    pub database_max_connections: u32,

    // ── Crypto ──────────────────────────────────────────────────────────
    /// 32-byte base64-encoded master key for AES-256-GCM token encryption.
    pub master_key: String,
    /// 32-byte base64-encoded HMAC key for OAuth state signing.
    pub hmac_secret: String,
    /// Secret for signing dashboard session JWTs.
    pub session_secret: String,

    // ── Spotify ─────────────────────────────────────────────────────────
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub spotify_redirect_url: String,
    /// Base URL of the accounts service (authorize + token endpoints).
    pub spotify_accounts_url: String,
    /// Base URL of the Web API (profile + playback endpoints).
    pub spotify_api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8430".into())
                .parse()
                .context("Invalid PORT")?,
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8430".into()),

            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL is required (PostgreSQL connection string)")?,
            database_max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".into())
                .parse()
                .context("Invalid DATABASE_MAX_CONNECTIONS")?,

            master_key: std::env::var("MASTER_KEY")
                .context("MASTER_KEY is required (32 bytes, base64)")?,
            hmac_secret: std::env::var("HMAC_SECRET")
                .context("HMAC_SECRET is required (32 bytes, base64)")?,
            session_secret: std::env::var("SESSION_SECRET")
                .context("SESSION_SECRET is required for dashboard sessions")?,

            spotify_client_id: std::env::var("SPOTIFY_CLIENT_ID")
                .context("SPOTIFY_CLIENT_ID is required")?,
            spotify_client_secret: std::env::var("SPOTIFY_CLIENT_SECRET")
                .context("SPOTIFY_CLIENT_SECRET is required")?,
            spotify_redirect_url: std::env::var("SPOTIFY_REDIRECT_URL")
                .context("SPOTIFY_REDIRECT_URL is required")?,
            spotify_accounts_url: std::env::var("SPOTIFY_ACCOUNTS_URL")
                .unwrap_or_else(|_| "https://accounts.spotify.com".into()),
            spotify_api_url: std::env::var("SPOTIFY_API_URL")
                .unwrap_or_else(|_| "https://api.spotify.com".into()),
        })
    }
}

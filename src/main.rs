use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use nowplaying_auth::auth::SessionSigner;
use nowplaying_auth::credentials::cache::MemoryCache;
use nowplaying_auth::credentials::{CredentialCache, CredentialService};
use nowplaying_auth::crypto::CryptoEngine;
use nowplaying_auth::providers::{PlaybackClient, RateLimitGate, SpotifyProvider};
use nowplaying_auth::store::PgCredentialStore;
use nowplaying_auth::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nowplaying_auth=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("nowplaying-auth v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{} (public URL {})", config.host, config.port, config.base_url);

    let crypto = Arc::new(
        CryptoEngine::new(&config.master_key, &config.hmac_secret).context("crypto setup")?,
    );

    let store = PgCredentialStore::new(
        &config.database_url,
        config.database_max_connections,
        crypto.clone(),
    )
    .await
    .context("database connection")?;
    store.migrate().await.context("database migration")?;
    info!("Database connected and migrated");

    let provider = Arc::new(SpotifyProvider::new(
        config.spotify_client_id.clone(),
        config.spotify_client_secret.clone(),
        config.spotify_redirect_url.clone(),
        config.spotify_accounts_url.clone(),
        config.spotify_api_url.clone(),
    ));

    // One gate for the whole process: the upstream quota is per client id.
    let gate = Arc::new(RateLimitGate::new());
    let playback = PlaybackClient::new(config.spotify_api_url.clone(), gate);

    let cache = Arc::new(CredentialCache::new(
        Arc::new(store),
        Arc::new(MemoryCache::new()),
    ));
    let credentials = CredentialService::new(cache, provider.clone(), playback);

    let state: SharedState = Arc::new(AppState {
        sessions: SessionSigner::new(&config.session_secret),
        config: config.clone(),
        crypto,
        provider,
        credentials,
    });

    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready");
    axum::serve(listener, app).await?;

    Ok(())
}

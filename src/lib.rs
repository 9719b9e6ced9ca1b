pub mod api;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod providers;
pub mod store;

pub use config::Config;
pub use error::AuthError;

use std::sync::Arc;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub crypto: Arc<crypto::CryptoEngine>,
    pub sessions: auth::SessionSigner,
    pub provider: Arc<dyn providers::OAuthProvider>,
    pub credentials: credentials::CredentialService,
}

pub type SharedState = Arc<AppState>;

//! Opaque public tokens handed to untrusted callers instead of the internal id.

use rand::Rng;

use crate::store::PublicTokenKind;

const RANDOM_LEN: usize = 32;

/// Generate a fresh public token.
///
/// Format: np_api_[32 random chars] or np_ovl_[32 random chars]
pub fn generate_public_token(kind: PublicTokenKind) -> String {
    let prefix = match kind {
        PublicTokenKind::Api => "np_api_",
        PublicTokenKind::Overlay => "np_ovl_",
    };
    format!("{prefix}{}", random_alphanumeric(RANDOM_LEN))
}

/// Random nonce for the OAuth `state` parameter.
pub fn generate_state_nonce() -> String {
    random_alphanumeric(16)
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

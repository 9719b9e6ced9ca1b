use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const MAC_LEN: usize = 32;

/// How long a signed OAuth state stays acceptable.
pub const STATE_MAX_AGE_SECS: i64 = 600;

fn new_hmac(key: &[u8]) -> Result<HmacSha256, AuthError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| AuthError::CryptoError(format!("HMAC init failed: {e}")))
}

/// AES-256-GCM for provider tokens at rest, HMAC-SHA256 for the OAuth state.
pub struct CryptoEngine {
    cipher: Aes256Gcm,
    hmac_key: Vec<u8>,
}

impl CryptoEngine {
    /// Create a new CryptoEngine from base64-encoded keys.
    pub fn new(master_key_b64: &str, hmac_secret_b64: &str) -> Result<Self, AuthError> {
        let master_key = base64::engine::general_purpose::STANDARD
            .decode(master_key_b64)
            .map_err(|e| AuthError::CryptoError(format!("Invalid MASTER_KEY base64: {e}")))?;

        if master_key.len() != 32 {
            return Err(AuthError::CryptoError(format!(
                "MASTER_KEY must be 32 bytes, got {}",
                master_key.len()
            )));
        }

        let hmac_key = base64::engine::general_purpose::STANDARD
            .decode(hmac_secret_b64)
            .map_err(|e| AuthError::CryptoError(format!("Invalid HMAC_SECRET base64: {e}")))?;

        let cipher = Aes256Gcm::new_from_slice(&master_key)
            .map_err(|e| AuthError::CryptoError(format!("Failed to init AES cipher: {e}")))?;

        Ok(Self { cipher, hmac_key })
    }

    /// Encrypt plaintext. Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AuthError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AuthError::CryptoError(format!("Encryption failed: {e}")))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt base64(nonce || ciphertext) back to plaintext.
    pub fn decrypt(&self, encrypted_b64: &str) -> Result<String, AuthError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encrypted_b64)
            .map_err(|e| AuthError::CryptoError(format!("Invalid base64: {e}")))?;

        if combined.len() < NONCE_LEN {
            return Err(AuthError::CryptoError("Ciphertext too short".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| AuthError::CryptoError(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| AuthError::CryptoError(format!("Invalid UTF-8 after decrypt: {e}")))
    }

    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>, AuthError> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    /// Empty strings are treated as absent, like NULL.
    pub fn decrypt_opt(&self, encrypted: Option<&str>) -> Result<Option<String>, AuthError> {
        match encrypted {
            Some(e) if !e.is_empty() => self.decrypt(e).map(Some),
            _ => Ok(None),
        }
    }

    /// Sign `nonce:issued_at` with HMAC-SHA256. Returns base64url(hmac || payload).
    pub fn issue_state(&self, nonce: &str, issued_at: i64) -> Result<String, AuthError> {
        let payload = format!("{nonce}:{issued_at}");

        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(payload.as_bytes());

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    /// Verify a state issued by [`issue_state`](Self::issue_state) and return its nonce.
    /// States older than [`STATE_MAX_AGE_SECS`] at `now` are rejected.
    pub fn verify_state(&self, signed: &str, now: i64) -> Result<String, AuthError> {
        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| AuthError::InvalidState)?;

        if combined.len() < MAC_LEN {
            return Err(AuthError::InvalidState);
        }

        let (signature, payload_bytes) = combined.split_at(MAC_LEN);

        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload_bytes);
        mac.verify_slice(signature)
            .map_err(|_| AuthError::InvalidState)?;

        let payload = std::str::from_utf8(payload_bytes).map_err(|_| AuthError::InvalidState)?;
        let (nonce, issued_at) = payload.rsplit_once(':').ok_or(AuthError::InvalidState)?;
        let issued_at: i64 = issued_at.parse().map_err(|_| AuthError::InvalidState)?;

        if now - issued_at > STATE_MAX_AGE_SECS || issued_at > now {
            return Err(AuthError::InvalidState);
        }

        Ok(nonce.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> CryptoEngine {
        let key = base64::engine::general_purpose::STANDARD.encode([0x42u8; 32]);
        let hmac = base64::engine::general_purpose::STANDARD.encode([0x43u8; 32]);
        CryptoEngine::new(&key, &hmac).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_token() {
        let engine = test_engine();
        let token = "BQDr-access-token";
        let encrypted = engine.encrypt(token).unwrap();
        assert_ne!(encrypted, token);
        assert_eq!(engine.decrypt(&encrypted).unwrap(), token);
    }

    #[test]
    fn test_encrypt_produces_different_ciphertexts() {
        let engine = test_engine();
        let a = engine.encrypt("same-input").unwrap();
        let b = engine.encrypt("same-input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_optional_tokens() {
        let engine = test_engine();
        assert_eq!(engine.encrypt_opt(None).unwrap(), None);
        assert_eq!(engine.decrypt_opt(None).unwrap(), None);
        assert_eq!(engine.decrypt_opt(Some("")).unwrap(), None);

        let enc = engine.encrypt_opt(Some("refresh")).unwrap();
        assert_eq!(
            engine.decrypt_opt(enc.as_deref()).unwrap().as_deref(),
            Some("refresh")
        );
    }

    #[test]
    fn test_rejects_short_master_key() {
        let key = base64::engine::general_purpose::STANDARD.encode([0x42u8; 16]);
        let hmac = base64::engine::general_purpose::STANDARD.encode([0x43u8; 32]);
        assert!(CryptoEngine::new(&key, &hmac).is_err());
    }

    #[test]
    fn test_state_issue_verify() {
        let engine = test_engine();
        let signed = engine.issue_state("abc123", 1_700_000_000).unwrap();
        let nonce = engine.verify_state(&signed, 1_700_000_060).unwrap();
        assert_eq!(nonce, "abc123");
    }

    #[test]
    fn test_state_expires() {
        let engine = test_engine();
        let signed = engine.issue_state("abc123", 1_700_000_000).unwrap();
        let err = engine
            .verify_state(&signed, 1_700_000_000 + STATE_MAX_AGE_SECS + 1)
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidState));
    }

    #[test]
    fn test_state_tamper_detection() {
        let engine = test_engine();
        let signed = engine.issue_state("legit", 1_700_000_000).unwrap();
        let tampered = format!("{}X", signed);
        assert!(engine.verify_state(&tampered, 1_700_000_001).is_err());
    }
}

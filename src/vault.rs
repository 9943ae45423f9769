//! Secrets at rest. Every refresh token, access token, API key and custom
//! OAuth client pair goes through here before touching the database;
//! decryption happens only at the OAuth/upstream boundary.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use tracing::error;

/// Prefix marking encrypted values stored in the database.
const ENCRYPTED_PREFIX: &str = "enc:";

/// AES-256-GCM vault over a process-wide key loaded at startup.
#[derive(Clone)]
pub struct CryptoVault {
    key: [u8; 32],
}

impl CryptoVault {
    /// Derive the 256-bit key from the configured passphrase via SHA-256,
    /// so any-length input works.
    pub fn new(passphrase: &str) -> Self {
        let hash = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&hash);
        Self { key }
    }

    /// Encrypt a plaintext string. Output is `enc:<base64(nonce || ciphertext)>`.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).expect("AES-256-GCM key is exactly 32 bytes");
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        match cipher.encrypt(&nonce, plaintext.as_bytes()) {
            Ok(ciphertext) => {
                let mut combined = nonce.to_vec();
                combined.extend_from_slice(&ciphertext);
                format!("{ENCRYPTED_PREFIX}{}", STANDARD.encode(&combined))
            }
            Err(e) => {
                // Encryption over a fixed-size key cannot fail in practice;
                // never store plaintext if it somehow does.
                error!("vault encryption failed: {e}");
                String::new()
            }
        }
    }

    /// Decrypt a stored value. Missing/empty values decrypt to empty; values
    /// without the prefix are treated as legacy plaintext and returned as-is.
    pub fn decrypt(&self, stored: Option<&str>) -> String {
        let Some(stored) = stored.filter(|s| !s.is_empty()) else {
            return String::new();
        };
        let Some(encoded) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            return stored.to_string();
        };

        let Ok(combined) = STANDARD.decode(encoded) else {
            error!("vault decryption: invalid base64 payload");
            return String::new();
        };
        if combined.len() < 12 {
            error!("vault decryption: data too short (expected nonce + ciphertext)");
            return String::new();
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).expect("AES-256-GCM key is exactly 32 bytes");

        match cipher.decrypt(nonce, ciphertext) {
            Ok(plaintext) => String::from_utf8(plaintext).unwrap_or_default(),
            Err(e) => {
                error!("vault decryption failed: {e}");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let vault = CryptoVault::new("test-passphrase");
        let cipher = vault.encrypt("1//refresh-token-value");
        assert!(cipher.starts_with("enc:"));
        assert_eq!(vault.decrypt(Some(&cipher)), "1//refresh-token-value");
    }

    #[test]
    fn nonces_differ_between_calls() {
        let vault = CryptoVault::new("k");
        assert_ne!(vault.encrypt("same"), vault.encrypt("same"));
    }

    #[test]
    fn missing_value_decrypts_to_empty() {
        let vault = CryptoVault::new("k");
        assert_eq!(vault.decrypt(None), "");
        assert_eq!(vault.decrypt(Some("")), "");
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let vault = CryptoVault::new("k");
        assert_eq!(vault.decrypt(Some("plain-token")), "plain-token");
    }

    #[test]
    fn wrong_key_decrypts_to_empty() {
        let vault_a = CryptoVault::new("key-a");
        let vault_b = CryptoVault::new("key-b");
        let cipher = vault_a.encrypt("secret");
        assert_eq!(vault_b.decrypt(Some(&cipher)), "");
    }
}

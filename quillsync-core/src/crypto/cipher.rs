//! AES-256-GCM encryption of note, folder, and image content.
//!
//! Every item gets its own data encryption key (DEK). Only the wrapped form
//! of a DEK ever reaches storage or transport; see [`crate::crypto::keyring`].

use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// A per-item data encryption key.
///
/// Generated once when the item is created and never regenerated; password
/// changes re-wrap the DEK rather than re-encrypting content.
#[derive(Clone)]
pub struct DataEncryptionKey {
    key: [u8; 32],
}

impl DataEncryptionKey {
    /// Generate a new random DEK.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self { key: key.into() }
    }

    /// Create a DEK from raw bytes (use with caution).
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes (use sparingly).
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for DataEncryptionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// An encrypted payload: opaque ciphertext plus nonce and auth tag.
///
/// This is the only content representation that crosses the sync boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Unique nonce for this payload (12 bytes).
    #[serde(with = "crate::integrity::base64_bytes")]
    pub nonce: [u8; 12],

    /// Encrypted data.
    #[serde(with = "crate::integrity::base64_bytes")]
    pub ciphertext: Vec<u8>,

    /// Authentication tag (16 bytes).
    #[serde(with = "crate::integrity::base64_bytes")]
    pub auth_tag: [u8; 16],
}

/// Encrypt plaintext under a DEK with a fresh random nonce.
///
/// # Security
/// - Nonces are never reused with the same key; one is drawn per call
/// - AES-256-GCM provides both confidentiality and authenticity
pub fn encrypt_payload(dek: &DataEncryptionKey, plaintext: &[u8]) -> Result<EncryptedPayload> {
    if plaintext.is_empty() {
        return Err(CryptoError::EncryptionFailed(
            "Cannot encrypt empty data".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(dek.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let nonce_bytes: [u8; 12] = nonce.into();

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

    // aes-gcm appends the tag to the ciphertext
    if ciphertext.len() < 16 {
        return Err(CryptoError::EncryptionFailed(
            "Ciphertext too short - missing auth tag".to_string(),
        ));
    }

    let tag_start = ciphertext.len() - 16;
    let auth_tag: [u8; 16] = ciphertext[tag_start..]
        .try_into()
        .map_err(|_| CryptoError::EncryptionFailed("Invalid auth tag length".to_string()))?;

    Ok(EncryptedPayload {
        nonce: nonce_bytes,
        ciphertext: ciphertext[..tag_start].to_vec(),
        auth_tag,
    })
}

/// Decrypt a payload under a DEK, verifying the auth tag.
///
/// Returns [`CryptoError::AuthenticationFailed`] if the key is wrong or the
/// payload was tampered with; corrupted plaintext is never returned.
pub fn decrypt_payload(dek: &DataEncryptionKey, payload: &EncryptedPayload) -> Result<Vec<u8>> {
    if payload.ciphertext.is_empty() {
        return Err(CryptoError::DecryptionFailed(
            "Cannot decrypt empty data".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(dek.as_bytes().into());
    let nonce = Nonce::from(payload.nonce);

    let mut ciphertext_with_tag = payload.ciphertext.clone();
    ciphertext_with_tag.extend_from_slice(&payload.auth_tag);

    cipher
        .decrypt(&nonce, ciphertext_with_tag.as_slice())
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dek_generation() {
        let dek = DataEncryptionKey::generate();
        assert_eq!(dek.as_bytes().len(), 32);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let dek = DataEncryptionKey::generate();
        let plaintext = b"# My note\n\nSome markdown content.";

        let encrypted = encrypt_payload(&dek, plaintext).unwrap();
        let decrypted = decrypt_payload(&dek, &encrypted).unwrap();

        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[test]
    fn test_different_nonces() {
        let dek = DataEncryptionKey::generate();
        let plaintext = b"Same data";

        let encrypted1 = encrypt_payload(&dek, plaintext).unwrap();
        let encrypted2 = encrypt_payload(&dek, plaintext).unwrap();

        assert_ne!(encrypted1.nonce, encrypted2.nonce);
        assert_ne!(encrypted1.ciphertext, encrypted2.ciphertext);

        assert_eq!(
            decrypt_payload(&dek, &encrypted1).unwrap(),
            decrypt_payload(&dek, &encrypted2).unwrap()
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let dek1 = DataEncryptionKey::generate();
        let dek2 = DataEncryptionKey::generate();

        let encrypted = encrypt_payload(&dek1, b"Secret data").unwrap();
        assert!(matches!(
            decrypt_payload(&dek2, &encrypted),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_tampering_detected() {
        let dek = DataEncryptionKey::generate();
        let mut encrypted = encrypt_payload(&dek, b"Original data").unwrap();

        encrypted.ciphertext[0] ^= 0xFF;
        assert!(decrypt_payload(&dek, &encrypted).is_err());
    }

    #[test]
    fn test_tampered_tag_detected() {
        let dek = DataEncryptionKey::generate();
        let mut encrypted = encrypt_payload(&dek, b"Original data").unwrap();

        encrypted.auth_tag[15] ^= 0x01;
        assert!(decrypt_payload(&dek, &encrypted).is_err());
    }

    #[test]
    fn test_empty_data_fails() {
        let dek = DataEncryptionKey::generate();

        assert!(encrypt_payload(&dek, b"").is_err());
        assert!(decrypt_payload(
            &dek,
            &EncryptedPayload {
                nonce: [0u8; 12],
                ciphertext: vec![],
                auth_tag: [0u8; 16],
            }
        )
        .is_err());
    }

    #[test]
    fn test_payload_serde_roundtrip() {
        let dek = DataEncryptionKey::generate();
        let encrypted = encrypt_payload(&dek, b"persist me").unwrap();

        let json = serde_json::to_string(&encrypted).unwrap();
        let restored: EncryptedPayload = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, encrypted);
        assert_eq!(decrypt_payload(&dek, &restored).unwrap(), b"persist me");

        // Byte fields travel as base64 strings, not number arrays
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["nonce"].is_string());
        assert!(value["ciphertext"].is_string());
        assert!(value["auth_tag"].is_string());
    }
}

//! Key hierarchy: password → master key → KEK → per-item DEKs.
//!
//! The master key is derived from the password and never stored. The KEK is
//! derived one-way from the master key and persisted only in wrapped form.
//! DEKs are random per item and travel exclusively as [`WrappedKey`] records;
//! a user-held recovery key can independently wrap the same DEK so a
//! password reset never re-encrypts content.

use crate::crypto::cipher::DataEncryptionKey;
use crate::crypto::kdf::{derive_master_key, KdfParams};
use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

const KEK_DERIVATION_INFO: &[u8] = b"quillsync/kek/v1";

/// The master key derived from the account password.
///
/// Lives only in process memory while unlocked; never persisted.
#[derive(ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; 32],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Get a reference to the key bytes (use sparingly).
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

/// The key-encryption-key that wraps per-item DEKs.
#[derive(ZeroizeOnDrop)]
pub struct Kek {
    key: [u8; 32],
}

impl Kek {
    /// Create a KEK from raw bytes.
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Get a reference to the key bytes (use sparingly).
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

/// A user-held recovery key that can wrap DEKs independently of the KEK.
#[derive(ZeroizeOnDrop)]
pub struct RecoveryKey {
    key: [u8; 32],
}

impl RecoveryKey {
    /// Generate a new random recovery key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self { key: key.into() }
    }

    /// Create a recovery key from raw bytes (e.g. a decoded recovery phrase).
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Get a reference to the key bytes (use sparingly).
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

/// Symmetric wrap algorithm identifier, persisted with the wrapped key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapAlgorithm {
    Aes256Gcm,
}

/// A wrapped (encrypted) key that can be safely stored or synced.
///
/// Retains the wrap algorithm tag so future unwrapping stays reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Wrap algorithm used.
    pub algorithm: WrapAlgorithm,

    /// Wrapped (encrypted) key bytes.
    #[serde(with = "crate::integrity::base64_bytes")]
    pub ciphertext: Vec<u8>,

    /// Nonce used for wrapping.
    #[serde(with = "crate::integrity::base64_bytes")]
    pub nonce: [u8; 12],

    /// Authentication tag.
    #[serde(with = "crate::integrity::base64_bytes")]
    pub auth_tag: [u8; 16],
}

/// Derive the KEK one-way from the master key via HKDF-SHA256.
pub fn derive_kek(master_key: &MasterKey) -> Kek {
    let hk = Hkdf::<Sha256>::new(None, master_key.as_bytes());
    let mut kek = [0u8; 32];
    // 32-byte output from SHA-256 HKDF cannot fail
    hk.expand(KEK_DERIVATION_INFO, &mut kek)
        .unwrap_or_else(|_| unreachable!("HKDF output length is fixed"));
    Kek::from_bytes(kek)
}

/// Wrap the KEK under the master key for at-rest storage.
///
/// Unwrapping this record also serves as the password check on unlock: a
/// wrong password derives a different master key and the auth tag rejects it.
pub fn wrap_kek(kek: &Kek, master_key: &MasterKey) -> Result<WrappedKey> {
    wrap_key_bytes(kek.as_bytes(), master_key.as_bytes())
}

/// Unwrap the KEK with the master key.
pub fn unwrap_kek(wrapped: &WrappedKey, master_key: &MasterKey) -> Result<Kek> {
    Ok(Kek::from_bytes(unwrap_key_bytes(
        wrapped,
        master_key.as_bytes(),
    )?))
}

/// Wrap a DEK under the KEK.
pub fn wrap_dek(dek: &DataEncryptionKey, kek: &Kek) -> Result<WrappedKey> {
    wrap_key_bytes(dek.as_bytes(), kek.as_bytes())
}

/// Unwrap a DEK with the KEK.
///
/// A mismatched KEK fails with [`CryptoError::AuthenticationFailed`]; the
/// AEAD tag check guarantees a wrong-but-plausible key is never returned.
pub fn unwrap_dek(wrapped: &WrappedKey, kek: &Kek) -> Result<DataEncryptionKey> {
    Ok(DataEncryptionKey::from_bytes(unwrap_key_bytes(
        wrapped,
        kek.as_bytes(),
    )?))
}

/// Wrap a DEK under the recovery key.
pub fn wrap_dek_with_recovery(dek: &DataEncryptionKey, recovery: &RecoveryKey) -> Result<WrappedKey> {
    wrap_key_bytes(dek.as_bytes(), recovery.as_bytes())
}

/// Unwrap a DEK with the recovery key.
pub fn unwrap_dek_with_recovery(
    wrapped: &WrappedKey,
    recovery: &RecoveryKey,
) -> Result<DataEncryptionKey> {
    Ok(DataEncryptionKey::from_bytes(unwrap_key_bytes(
        wrapped,
        recovery.as_bytes(),
    )?))
}

/// Re-wrapped key material produced by a password reset.
pub struct PasswordReset {
    /// Fresh derivation parameters for the new password.
    pub kdf_params: KdfParams,

    /// New KEK wrapped under the new master key.
    pub wrapped_kek: WrappedKey,

    /// The same DEK re-wrapped under the new KEK.
    pub wrapped_dek: WrappedKey,
}

/// Reset the account password using the recovery key.
///
/// Unwraps the DEK via the recovery key, derives a new master key and KEK
/// from the new password, and re-wraps the *same* DEK - content is never
/// re-encrypted. The recovery-wrapped copy stays valid unchanged.
pub fn reset_password_with_recovery(
    wrapped_by_recovery: &WrappedKey,
    recovery: &RecoveryKey,
    new_password: &[u8],
) -> Result<PasswordReset> {
    let dek = unwrap_dek_with_recovery(wrapped_by_recovery, recovery)?;

    let kdf_params = KdfParams::new();
    let master_key = derive_master_key(new_password, &kdf_params)?;
    let kek = derive_kek(&master_key);

    Ok(PasswordReset {
        wrapped_kek: wrap_kek(&kek, &master_key)?,
        wrapped_dek: wrap_dek(&dek, &kek)?,
        kdf_params,
    })
}

/// Drop an item's extra password layer.
///
/// Unwraps the DEK with the item-specific KEK and re-wraps it under the
/// account KEK only, so the item follows the normal unlock path afterwards.
pub fn remove_password_protection(
    wrapped: &WrappedKey,
    item_kek: &Kek,
    account_kek: &Kek,
) -> Result<WrappedKey> {
    let dek = unwrap_dek(wrapped, item_kek)?;
    wrap_dek(&dek, account_kek)
}

// --- AEAD key wrap helpers ---

fn wrap_key_bytes(key: &[u8; 32], wrapping_key: &[u8; 32]) -> Result<WrappedKey> {
    let cipher = Aes256Gcm::new(wrapping_key.into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let nonce_bytes: [u8; 12] = nonce.into();

    let ciphertext = cipher
        .encrypt(&nonce, key.as_ref())
        .map_err(|e| CryptoError::EncryptionFailed(format!("Key wrap failed: {}", e)))?;

    if ciphertext.len() < 16 {
        return Err(CryptoError::EncryptionFailed(
            "Wrapped key too short".to_string(),
        ));
    }

    let tag_start = ciphertext.len() - 16;
    let auth_tag: [u8; 16] = ciphertext[tag_start..]
        .try_into()
        .map_err(|_| CryptoError::EncryptionFailed("Invalid auth tag".to_string()))?;

    Ok(WrappedKey {
        algorithm: WrapAlgorithm::Aes256Gcm,
        ciphertext: ciphertext[..tag_start].to_vec(),
        nonce: nonce_bytes,
        auth_tag,
    })
}

fn unwrap_key_bytes(wrapped: &WrappedKey, wrapping_key: &[u8; 32]) -> Result<[u8; 32]> {
    let WrapAlgorithm::Aes256Gcm = wrapped.algorithm;

    let cipher = Aes256Gcm::new(wrapping_key.into());
    let nonce = Nonce::from(wrapped.nonce);

    let mut ciphertext_with_tag = wrapped.ciphertext.clone();
    ciphertext_with_tag.extend_from_slice(&wrapped.auth_tag);

    let key_bytes = cipher
        .decrypt(&nonce, ciphertext_with_tag.as_slice())
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    let len = key_bytes.len();
    key_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, got: len })
}

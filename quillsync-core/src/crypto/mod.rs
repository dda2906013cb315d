//! Cryptographic primitives for the sync core.
//!
//! This module provides:
//! - Argon2id master-key derivation
//! - AES-256-GCM payload encryption
//! - Key hierarchy (master key → KEK → per-item DEKs)
//! - Lockable in-memory session keys
//! - Zeroization utilities

pub mod cipher;
pub mod kdf;
pub mod keyring;
pub mod session;
pub mod zero;

pub use cipher::{decrypt_payload, encrypt_payload, DataEncryptionKey, EncryptedPayload};
pub use kdf::{derive_master_key, verify_master_password, KdfAlgorithm, KdfParams};
pub use keyring::{
    derive_kek, remove_password_protection, reset_password_with_recovery, unwrap_dek, unwrap_kek,
    wrap_dek, wrap_kek, Kek, MasterKey, PasswordReset, RecoveryKey, WrapAlgorithm, WrappedKey,
};
pub use session::{ProvisionedVault, SessionKeys};
pub use zero::SecureBuffer;

use thiserror::Error;

/// Errors that can occur in cryptographic operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Authentication failed - wrong key or tampered data")]
    AuthenticationFailed,

    #[error("Keys are locked")]
    Locked,
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

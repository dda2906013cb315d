//! Argon2id key derivation for the account password.
//!
//! The derivation parameters are persisted alongside the salt (including an
//! algorithm tag) so the same master key can be re-derived on every device
//! and across algorithm upgrades.

use crate::crypto::keyring::MasterKey;
use crate::crypto::{CryptoError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

/// Memory-hard KDF algorithm identifier, persisted with the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KdfAlgorithm {
    Argon2id,
}

/// Parameters for master-key derivation.
///
/// These are stored next to the wrapped key material; they are not secret,
/// but they must be retained losslessly or the master key becomes
/// unrecoverable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Which KDF produced the key.
    pub algorithm: KdfAlgorithm,

    /// Per-user salt (16 bytes).
    #[serde(with = "crate::integrity::base64_bytes")]
    pub salt: [u8; 16],

    /// Memory cost in KiB.
    pub mem_cost: u32,

    /// Time cost (number of iterations).
    pub time_cost: u32,

    /// Parallelism (number of lanes).
    pub parallelism: u32,

    /// Output length in bytes.
    pub output_length: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: KdfAlgorithm::Argon2id,
            salt: rand::random(),
            mem_cost: 65_536, // 64 MB
            time_cost: 3,
            parallelism: 4,
            output_length: 32,
        }
    }
}

impl KdfParams {
    /// Create new parameters with a fresh random salt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify that parameters are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        if self.mem_cost < 19_456 {
            return Err(CryptoError::KdfFailed(
                "Memory cost too low (minimum: 19 MiB)".to_string(),
            ));
        }
        if self.time_cost < 1 {
            return Err(CryptoError::KdfFailed(
                "Time cost too low (minimum: 1)".to_string(),
            ));
        }
        if self.parallelism < 1 {
            return Err(CryptoError::KdfFailed(
                "Parallelism too low (minimum: 1)".to_string(),
            ));
        }
        if self.output_length < 32 {
            return Err(CryptoError::KdfFailed(
                "Output length too short (minimum: 32 bytes)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Derive the master key from the account password.
///
/// The master key is never persisted; it is recomputed from the password on
/// every unlock using the stored parameters.
///
/// # Security
/// - Argon2id resists both GPU and side-channel attacks
/// - The same (password, params) pair always yields the same key
pub fn derive_master_key(password: &[u8], params: &KdfParams) -> Result<MasterKey> {
    params.validate()?;

    let argon_params = Params::new(
        params.mem_cost,
        params.time_cost,
        params.parallelism,
        Some(params.output_length as usize),
    )
    .map_err(|e| CryptoError::KdfFailed(format!("Invalid parameters: {}", e)))?;

    let argon2 = match params.algorithm {
        KdfAlgorithm::Argon2id => Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params),
    };

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password, &params.salt, &mut key)
        .map_err(|e| CryptoError::KdfFailed(format!("Derivation failed: {}", e)))?;

    Ok(MasterKey::from_bytes(key))
}

/// Verify the account password by re-deriving and comparing in constant time.
pub fn verify_master_password(
    password: &[u8],
    params: &KdfParams,
    expected: &MasterKey,
) -> Result<()> {
    use subtle::ConstantTimeEq;

    let derived = derive_master_key(password, params)?;
    if derived.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(CryptoError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            mem_cost: 19_456,
            time_cost: 1,
            parallelism: 1,
            ..KdfParams::new()
        }
    }

    #[test]
    fn test_kdf_params_default() {
        let params = KdfParams::default();
        assert_eq!(params.algorithm, KdfAlgorithm::Argon2id);
        assert_eq!(params.mem_cost, 65_536);
        assert_eq!(params.time_cost, 3);
        assert_eq!(params.output_length, 32);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_kdf_params_validation() {
        let mut params = KdfParams::default();

        params.mem_cost = 1000;
        assert!(params.validate().is_err());

        params.mem_cost = 65_536;
        params.time_cost = 0;
        assert!(params.validate().is_err());

        params.time_cost = 3;
        params.parallelism = 0;
        assert!(params.validate().is_err());

        params.parallelism = 4;
        params.output_length = 16;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_derive_master_key_deterministic() {
        let password = b"test_password_123!";
        let params = fast_params();

        let key1 = derive_master_key(password, &params).unwrap();
        let key2 = derive_master_key(password, &params).unwrap();
        assert_eq!(key1.as_bytes(), key2.as_bytes());

        let key3 = derive_master_key(b"different_password", &params).unwrap();
        assert_ne!(key1.as_bytes(), key3.as_bytes());

        let mut params2 = params.clone();
        params2.salt = rand::random();
        let key4 = derive_master_key(password, &params2).unwrap();
        assert_ne!(key1.as_bytes(), key4.as_bytes());
    }

    #[test]
    fn test_verify_master_password() {
        let password = b"correct_password";
        let params = fast_params();
        let key = derive_master_key(password, &params).unwrap();

        assert!(verify_master_password(password, &params, &key).is_ok());
        assert!(matches!(
            verify_master_password(b"wrong_password", &params, &key),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_params_serde_roundtrip() {
        let params = fast_params();
        let json = serde_json::to_string(&params).unwrap();
        let restored: KdfParams = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.salt, params.salt);
        assert_eq!(restored.mem_cost, params.mem_cost);
        assert_eq!(restored.algorithm, params.algorithm);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["salt"].is_string());
    }
}

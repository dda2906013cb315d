//! In-memory session keys with explicit lock/unlock semantics.
//!
//! The unlocked master key, KEK, and account DEK are the only mutable shared
//! state in the core. They live in a single guarded slot: concurrent
//! encrypt/decrypt calls read it, `lock` clears it for every subsequent
//! reader, and a call that races past a lock fails with
//! [`CryptoError::Locked`] instead of proceeding with cleared material.

use crate::crypto::cipher::DataEncryptionKey;
use crate::crypto::kdf::{derive_master_key, KdfParams};
use crate::crypto::keyring::{derive_kek, unwrap_dek, unwrap_kek, wrap_dek, wrap_kek, Kek, MasterKey, WrappedKey};
use crate::crypto::zero::SecureBuffer;
use crate::crypto::{CryptoError, Result};
use std::sync::RwLock;
use tracing::info;

struct UnlockedKeys {
    master_key: MasterKey,
    kek: Kek,
    dek: DataEncryptionKey,
}

/// Key material produced when provisioning a fresh vault.
pub struct ProvisionedVault {
    /// Derivation parameters for the chosen password.
    pub kdf_params: KdfParams,

    /// KEK wrapped under the master key.
    pub wrapped_kek: WrappedKey,

    /// Account DEK wrapped under the KEK.
    pub wrapped_dek: WrappedKey,
}

/// The explicitly-lockable holder for unlocked key material.
///
/// Owned by the authentication/session component and passed by reference
/// into encrypt/decrypt call sites; there is no ambient global key state.
pub struct SessionKeys {
    slot: RwLock<Option<UnlockedKeys>>,
}

impl SessionKeys {
    /// Create a new, locked session.
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Provision a fresh vault: derive keys from the password, generate the
    /// account DEK, and leave the session unlocked.
    ///
    /// Returns the persisted forms the storage layer must retain.
    pub fn provision(&self, password: &SecureBuffer) -> Result<ProvisionedVault> {
        let kdf_params = KdfParams::new();
        let master_key = derive_master_key(password.as_bytes(), &kdf_params)?;
        let kek = derive_kek(&master_key);
        let dek = DataEncryptionKey::generate();

        let wrapped_kek = wrap_kek(&kek, &master_key)?;
        let wrapped_dek = wrap_dek(&dek, &kek)?;

        let mut slot = self.slot.write().map_err(|_| CryptoError::Locked)?;
        *slot = Some(UnlockedKeys {
            master_key,
            kek,
            dek,
        });
        info!("session provisioned and unlocked");

        Ok(ProvisionedVault {
            kdf_params,
            wrapped_kek,
            wrapped_dek,
        })
    }

    /// Unlock the session from the password and stored key records.
    ///
    /// A wrong password surfaces as [`CryptoError::AuthenticationFailed`]
    /// from the KEK unwrap; the auth tag check is the password check.
    pub fn unlock(
        &self,
        password: &SecureBuffer,
        kdf_params: &KdfParams,
        wrapped_kek: &WrappedKey,
        wrapped_dek: &WrappedKey,
    ) -> Result<()> {
        let master_key = derive_master_key(password.as_bytes(), kdf_params)?;
        let kek = unwrap_kek(wrapped_kek, &master_key)?;
        let dek = unwrap_dek(wrapped_dek, &kek)?;

        let mut slot = self.slot.write().map_err(|_| CryptoError::Locked)?;
        *slot = Some(UnlockedKeys {
            master_key,
            kek,
            dek,
        });
        info!("session unlocked");

        Ok(())
    }

    /// Lock the session, zeroizing all key material.
    ///
    /// Waits for in-flight readers to finish; every later access fails.
    /// Clears the slot even if a panicking reader poisoned the lock, so key
    /// material never outlives a lock call.
    pub fn lock(&self) {
        let mut slot = self
            .slot
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Dropping the keys zeroizes them
        slot.take();
        info!("session locked");
    }

    /// Check whether the session is currently unlocked.
    pub fn is_unlocked(&self) -> bool {
        self.slot.read().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Run `f` with the account DEK, failing if the session is locked.
    pub fn with_dek<R>(&self, f: impl FnOnce(&DataEncryptionKey) -> Result<R>) -> Result<R> {
        let slot = self.slot.read().map_err(|_| CryptoError::Locked)?;
        let keys = slot.as_ref().ok_or(CryptoError::Locked)?;
        f(&keys.dek)
    }

    /// Run `f` with the KEK, failing if the session is locked.
    pub fn with_kek<R>(&self, f: impl FnOnce(&Kek) -> Result<R>) -> Result<R> {
        let slot = self.slot.read().map_err(|_| CryptoError::Locked)?;
        let keys = slot.as_ref().ok_or(CryptoError::Locked)?;
        f(&keys.kek)
    }

    /// Run `f` with the master key, failing if the session is locked.
    pub fn with_master_key<R>(&self, f: impl FnOnce(&MasterKey) -> Result<R>) -> Result<R> {
        let slot = self.slot.read().map_err(|_| CryptoError::Locked)?;
        let keys = slot.as_ref().ok_or(CryptoError::Locked)?;
        f(&keys.master_key)
    }
}

impl Default for SessionKeys {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::{decrypt_payload, encrypt_payload};

    #[test]
    fn test_provision_then_lock_unlock() {
        let session = SessionKeys::new();
        let password = SecureBuffer::from("correct horse battery".to_string());

        let vault = session.provision(&password).unwrap();
        assert!(session.is_unlocked());

        session.lock();
        assert!(!session.is_unlocked());

        session
            .unlock(&password, &vault.kdf_params, &vault.wrapped_kek, &vault.wrapped_dek)
            .unwrap();
        assert!(session.is_unlocked());
    }

    #[test]
    fn test_unlock_with_wrong_password_fails() {
        let session = SessionKeys::new();
        let password = SecureBuffer::from("right".to_string());
        let vault = session.provision(&password).unwrap();
        session.lock();

        let wrong = SecureBuffer::from("wrong".to_string());
        let err = session
            .unlock(&wrong, &vault.kdf_params, &vault.wrapped_kek, &vault.wrapped_dek)
            .unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
        assert!(!session.is_unlocked());
    }

    #[test]
    fn test_locked_access_fails() {
        let session = SessionKeys::new();
        assert!(matches!(
            session.with_dek(|_| Ok(())),
            Err(CryptoError::Locked)
        ));
    }

    #[test]
    fn test_dek_survives_lock_unlock_cycle() {
        let session = SessionKeys::new();
        let password = SecureBuffer::from("cycle".to_string());
        let vault = session.provision(&password).unwrap();

        let encrypted = session
            .with_dek(|dek| encrypt_payload(dek, b"note body"))
            .unwrap();

        session.lock();
        session
            .unlock(&password, &vault.kdf_params, &vault.wrapped_kek, &vault.wrapped_dek)
            .unwrap();

        let plaintext = session
            .with_dek(|dek| decrypt_payload(dek, &encrypted))
            .unwrap();
        assert_eq!(plaintext, b"note body");
    }

    #[test]
    fn test_lock_clears_keys_despite_poisoned_slot() {
        let session = std::sync::Arc::new(SessionKeys::new());
        let password = SecureBuffer::from("poison".to_string());
        session.provision(&password).unwrap();

        // Poison the slot with a panicking writer
        let poisoner = std::sync::Arc::clone(&session);
        let result = std::thread::spawn(move || {
            let _guard = poisoner.slot.write().unwrap();
            panic!("writer died holding the slot");
        })
        .join();
        assert!(result.is_err());

        // lock() still clears the slot; the session stays locked
        session.lock();
        assert!(!session.is_unlocked());
        assert!(matches!(
            session.with_dek(|_| Ok(())),
            Err(CryptoError::Locked)
        ));
    }

    #[test]
    fn test_multiple_lock_unlock_cycles() {
        let session = SessionKeys::new();
        let password = SecureBuffer::from("cycles".to_string());
        let vault = session.provision(&password).unwrap();

        for _ in 0..3 {
            session.lock();
            assert!(!session.is_unlocked());
            session
                .unlock(&password, &vault.kdf_params, &vault.wrapped_kek, &vault.wrapped_dek)
                .unwrap();
            assert!(session.is_unlocked());
        }
    }
}

//! QuillSync Core Library
//!
//! The offline-first synchronization core of a zero-knowledge, end-to-end
//! encrypted multi-device note-taking application. The server and transport
//! only ever see opaque ciphertext plus small causality metadata; conflict
//! detection, merge, and integrity verification all operate without
//! inspecting plaintext.
//!
//! The core provides:
//! - Key hierarchy: password → master key → KEK → per-item DEKs
//! - Keyed integrity envelopes with context-bound MAC keys
//! - Vector-clock causality tracking
//! - Concurrent-edit conflict detection, resolution, and batch merging
//! - Backup snapshot packaging with version retention
//!
//! Transport, storage, and UI are external collaborators: the core performs
//! no I/O and spawns no background work.

pub mod backup;
pub mod crypto;
pub mod integrity;
pub mod sync;

pub use backup::{
    enforce_retention, open_backup, package_backup, BackupError, BackupInfo, BackupPackage,
    RetentionPlan,
};
pub use crypto::{
    decrypt_payload, derive_kek, derive_master_key, encrypt_payload, unwrap_dek, unwrap_kek,
    verify_master_password, wrap_dek, wrap_kek, CryptoError, DataEncryptionKey, EncryptedPayload,
    KdfParams, Kek, MasterKey, RecoveryKey, SecureBuffer, SessionKeys, WrappedKey,
};
pub use integrity::{IntegrityEnvelope, IntegrityKey, KeyContext, Verification};
pub use sync::{
    detect_conflict, merge_changes, order_changes_by_causality, resolve_conflict, CausalOrdering,
    Change, ChangeOp, Conflict, EntityKind, EntityRef, MergeOutcome, ResolutionMode,
    ResolvedConflict, SyncError, VectorClock,
};

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Top-level error type aggregating every layer of the core.
///
/// The variants keep "wrong password", "corrupted data", and "bad input"
/// distinguishable so callers can branch without string matching.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Sync error: {0}")]
    Sync(#[from] sync::SyncError),

    #[error("Backup error: {0}")]
    Backup(#[from] backup::BackupError),
}

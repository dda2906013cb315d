//! Backup packaging and version retention.
//!
//! A backup is a full-state snapshot of the ids present at capture time,
//! wrapped in the same integrity envelope contract the sync pipeline uses,
//! under a backup-context key. Retention keeps the most recent versions and
//! evicts oldest-first.

use crate::integrity::{IntegrityEnvelope, IntegrityKey, KeyContext};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from backup packaging and verification.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup corrupted - checksum mismatch")]
    ChecksumMismatch,

    #[error("Backup serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Wrong key context: expected backup, got {0:?}")]
    WrongKeyContext(KeyContext),
}

/// A versioned snapshot of the full id set at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Stable backup identifier.
    pub backup_id: Uuid,

    /// Capture time, Unix milliseconds.
    pub timestamp: i64,

    /// All note ids present at capture.
    pub note_ids: Vec<Uuid>,

    /// All folder ids present at capture.
    pub folder_ids: Vec<Uuid>,

    /// All image ids present at capture.
    pub image_ids: Vec<Uuid>,
}

/// A checksummed backup ready for storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPackage {
    /// The snapshot wrapped in an integrity envelope.
    pub envelope: IntegrityEnvelope,
}

/// Which backups to keep and which to evict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<BackupInfo>,
    pub remove: Vec<BackupInfo>,
}

/// Package a snapshot under a backup-context integrity key.
///
/// A key bound to any other context is refused; sync and backup checksums
/// must never share a key.
pub fn package_backup(info: &BackupInfo, key: &IntegrityKey) -> Result<BackupPackage, BackupError> {
    if key.context() != KeyContext::Backup {
        return Err(BackupError::WrongKeyContext(key.context()));
    }

    let payload = serde_json::to_vec(info)?;
    Ok(BackupPackage {
        envelope: IntegrityEnvelope::wrap_at(payload, info.timestamp, key),
    })
}

/// Verify a package and recover its snapshot.
///
/// A checksum mismatch is a hard error - corrupted backups are reported,
/// never partially trusted.
pub fn open_backup(package: &BackupPackage, key: &IntegrityKey) -> Result<BackupInfo, BackupError> {
    if key.context() != KeyContext::Backup {
        return Err(BackupError::WrongKeyContext(key.context()));
    }

    let payload = package
        .envelope
        .verify(key)
        .into_payload()
        .ok_or(BackupError::ChecksumMismatch)?;

    Ok(serde_json::from_slice(&payload)?)
}

/// Split backups into the `max_versions` most recent and the remainder.
///
/// Under the limit, `keep` is the input unchanged and unreordered. Ties in
/// timestamp are broken by stable input order; only set membership of
/// `keep`/`remove` is contractual, not ordering within them.
pub fn enforce_retention(backups: &[BackupInfo], max_versions: usize) -> RetentionPlan {
    if backups.len() <= max_versions {
        return RetentionPlan {
            keep: backups.to_vec(),
            remove: Vec::new(),
        };
    }

    let mut indices: Vec<usize> = (0..backups.len()).collect();
    // Newest first; stable on input position for equal timestamps
    indices.sort_by_key(|&i| (std::cmp::Reverse(backups[i].timestamp), i));

    let mut keep_flags = vec![false; backups.len()];
    for &i in indices.iter().take(max_versions) {
        keep_flags[i] = true;
    }

    let mut keep = Vec::with_capacity(max_versions);
    let mut remove = Vec::with_capacity(backups.len() - max_versions);
    for (i, backup) in backups.iter().enumerate() {
        if keep_flags[i] {
            keep.push(backup.clone());
        } else {
            remove.push(backup.clone());
        }
    }

    RetentionPlan { keep, remove }
}

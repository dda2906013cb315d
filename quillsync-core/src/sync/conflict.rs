//! Concurrent-edit conflict detection and resolution.
//!
//! Two changes conflict only when they touch the same entity and their
//! clocks are concurrent; ordered changes need no resolution because the
//! causally later one wins by construction. Resolution never inspects
//! plaintext - it operates on envelope metadata and opaque payload handles.

use crate::integrity::IntegrityKey;
use crate::sync::clock::VectorClock;
use crate::sync::models::{Change, ChangeOp};
use crate::sync::SyncError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A detected pair of concurrent changes to the same entity.
///
/// Ephemeral: exists only during a merge, never persisted.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub local: Change,
    pub remote: Change,
}

/// How to resolve a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMode {
    /// Result carries the local payload; clocks merged.
    KeepLocal,
    /// Result carries the remote payload; clocks merged.
    KeepRemote,
    /// Remote stays entity-of-record; the local version becomes a new
    /// sibling entity (the pipeline mints its id). No data loss.
    KeepBoth,
}

impl FromStr for ResolutionMode {
    type Err = SyncError;

    /// Parse a mode name. An unknown mode is a caller programming error and
    /// surfaces immediately rather than silently defaulting.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-local" => Ok(ResolutionMode::KeepLocal),
            "keep-remote" => Ok(ResolutionMode::KeepRemote),
            "keep-both" => Ok(ResolutionMode::KeepBoth),
            other => Err(SyncError::UnknownResolutionMode(other.to_string())),
        }
    }
}

/// A resolved conflict: the chosen strategy and the resulting change.
///
/// Persisted only as its resulting change; surfaced whole for audit/UI.
#[derive(Debug, Clone)]
pub struct ResolvedConflict {
    /// The conflicting pair this resolution settles.
    pub conflict: Conflict,

    /// Strategy that was applied.
    pub strategy: ResolutionMode,

    /// The change to apply in place of the conflicting pair.
    pub change: Change,

    /// `merge(local.clock, remote.clock)`, carried by `change`.
    pub merged_clock: VectorClock,

    /// True when the pipeline must mint a fresh entity id for `change`
    /// (keep-both sibling copies; the remote stays entity-of-record).
    pub needs_fresh_identity: bool,
}

/// Classify a pair of changes.
///
/// Returns `None` for changes to different entities (always independent)
/// and for ordered or equal clocks; `Some` only for a genuine concurrent
/// pair on one entity.
pub fn detect_conflict(local: &Change, remote: &Change) -> Option<Conflict> {
    if local.entity != remote.entity {
        return None;
    }
    if !local.clock.is_concurrent_with(&remote.clock) {
        return None;
    }
    Some(Conflict {
        local: local.clone(),
        remote: remote.clone(),
    })
}

/// Apply a resolution strategy to a conflict.
///
/// The resulting change always preserves the entity id, carries the merged
/// clock, and is resealed so it still verifies under the sync key.
pub fn resolve_conflict(
    conflict: &Conflict,
    mode: ResolutionMode,
    key: &IntegrityKey,
) -> ResolvedConflict {
    let merged_clock = conflict.local.clock.merge(&conflict.remote.clock);
    let timestamp = conflict.local.timestamp.max(conflict.remote.timestamp);

    let (mut change, needs_fresh_identity) = match mode {
        ResolutionMode::KeepLocal => (conflict.local.clone(), false),
        ResolutionMode::KeepRemote => (conflict.remote.clone(), false),
        ResolutionMode::KeepBoth => {
            // Local content survives as a sibling create; the pipeline
            // re-emits the remote change under the original entity id.
            let mut sibling = conflict.local.clone();
            sibling.op = ChangeOp::Create;
            (sibling, true)
        }
    };

    change.clock = merged_clock.clone();
    change.timestamp = timestamp;
    change.reseal(key);

    ResolvedConflict {
        conflict: conflict.clone(),
        strategy: mode,
        change,
        merged_clock,
        needs_fresh_identity,
    }
}

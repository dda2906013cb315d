//! The change merge pipeline.
//!
//! Intersects a local and a remote batch, resolves conflicting pairs via a
//! caller-supplied policy, and emits one causally ordered stream the local
//! store can apply. One invocation runs to completion before another starts;
//! the policy callback may be interactive.

use crate::integrity::IntegrityKey;
use crate::sync::conflict::{detect_conflict, resolve_conflict, Conflict, ResolutionMode, ResolvedConflict};
use crate::sync::models::{Change, EntityRef};
use crate::sync::SyncError;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A change excluded from a merge, with the reason it was rejected.
#[derive(Debug, Clone)]
pub struct RejectedChange {
    pub change: Change,
    pub reason: String,
}

/// Result of merging a local and a remote batch.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The causally ordered stream to apply.
    pub merged: Vec<Change>,

    /// Every resolution that was applied, for audit/UI surfacing.
    pub resolutions: Vec<ResolvedConflict>,

    /// Malformed or tampered records diverted from the batch.
    pub rejected: Vec<RejectedChange>,
}

/// Merge a local and a remote change batch.
///
/// Conflicts are detected per entity across the two batches; every change
/// touching a conflicted entity is withheld from pass-through and replaced
/// by its resolution. A failing policy callback propagates immediately and
/// no partial outcome is returned - per-entity resolution is independent,
/// so the caller may retry.
///
/// Malformed records are rejected individually without aborting the merge.
pub fn merge_changes<F>(
    local: Vec<Change>,
    remote: Vec<Change>,
    key: &IntegrityKey,
    mut policy: F,
) -> Result<MergeOutcome, SyncError>
where
    F: FnMut(&Conflict) -> Result<ResolutionMode, SyncError>,
{
    let local_count = local.len();
    let remote_count = remote.len();

    let mut rejected = Vec::new();
    let local = screen_batch(local, key, &mut rejected);
    let remote = screen_batch(remote, key, &mut rejected);

    // Cross-detect conflicts between every local/remote pair sharing an
    // entity. Quadratic per entity; batches are bounded by changes since
    // the last sync.
    let mut conflicts: Vec<Conflict> = Vec::new();
    for l in &local {
        for r in &remote {
            if let Some(conflict) = detect_conflict(l, r) {
                conflicts.push(conflict);
            }
        }
    }

    let conflicted_entities: HashSet<EntityRef> =
        conflicts.iter().map(|c| c.local.entity).collect();

    let mut merged: Vec<Change> = Vec::new();
    merged.extend(
        local
            .into_iter()
            .filter(|c| !conflicted_entities.contains(&c.entity)),
    );
    merged.extend(
        remote
            .into_iter()
            .filter(|c| !conflicted_entities.contains(&c.entity)),
    );

    let mut resolutions = Vec::with_capacity(conflicts.len());
    for conflict in &conflicts {
        let mode = policy(conflict)?;
        let mut resolved = resolve_conflict(conflict, mode, key);

        if resolved.needs_fresh_identity {
            // Keep-both: the remote stays entity-of-record; the local copy
            // becomes a new sibling entity minted here, not by the resolver.
            let sibling_id = Uuid::new_v4();
            resolved.change.entity = resolved.change.entity.with_id(sibling_id);
            resolved.change.reseal(key);
            merged.push(resolved.conflict.remote.clone());
            debug!(entity = %resolved.conflict.remote.entity, sibling = %resolved.change.entity,
                "kept both versions; minted sibling entity");
        }

        merged.push(resolved.change.clone());
        resolutions.push(resolved);
    }

    let merged = order_changes_by_causality(merged);

    info!(
        local = local_count,
        remote = remote_count,
        conflicts = resolutions.len(),
        rejected = rejected.len(),
        merged = merged.len(),
        "merged change batches"
    );

    Ok(MergeOutcome {
        merged,
        resolutions,
        rejected,
    })
}

/// Order changes so every change sorts after everything that happened
/// before it. Causally unordered changes are sequenced by timestamp
/// ascending, then by batch position - a presentation order only, since
/// wall clocks may skew across devices.
pub fn order_changes_by_causality(changes: Vec<Change>) -> Vec<Change> {
    let n = changes.len();

    // Happened-before edges, then a Kahn pass picking the earliest-stamped
    // ready change each round. Stable for equal timestamps.
    let mut indegree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in 0..n {
            if i != j && changes[i].clock.happened_before(&changes[j].clock) {
                successors[i].push(j);
                indegree[j] += 1;
            }
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(n);
    let mut emitted = vec![false; n];

    while !ready.is_empty() {
        let pos = ready
            .iter()
            .enumerate()
            .min_by_key(|(_, &i)| (changes[i].timestamp, i))
            .map(|(pos, _)| pos)
            .unwrap_or(0);
        let next = ready.swap_remove(pos);

        emitted[next] = true;
        for &succ in &successors[next] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.push(succ);
            }
        }
        ordered.push(next);
    }

    // The happened-before relation is acyclic, so every change is emitted
    debug_assert!(emitted.iter().all(|&e| e));

    let mut slots: Vec<Option<Change>> = changes.into_iter().map(Some).collect();
    ordered
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

/// Validate and checksum-verify a batch, diverting bad records.
fn screen_batch(
    batch: Vec<Change>,
    key: &IntegrityKey,
    rejected: &mut Vec<RejectedChange>,
) -> Vec<Change> {
    let mut ok = Vec::with_capacity(batch.len());
    for change in batch {
        if let Err(err) = change.validate() {
            warn!(entity = %change.entity, %err, "rejected malformed change");
            rejected.push(RejectedChange {
                change,
                reason: err.to_string(),
            });
            continue;
        }
        if !change.verify_checksum(key) {
            warn!(entity = %change.entity, "rejected change with bad checksum");
            rejected.push(RejectedChange {
                change,
                reason: "checksum mismatch".to_string(),
            });
            continue;
        }
        ok.push(change);
    }
    ok
}

//! Encrypted synchronization engine.
//!
//! Vector-clock causality tracking, concurrent-edit conflict detection and
//! resolution, and the merge pipeline that turns a local and a remote batch
//! into one causally ordered, applyable stream. The server only ever sees
//! ciphertext plus this module's causality metadata.

pub mod clock;
pub mod conflict;
pub mod models;
pub mod pipeline;

pub use clock::{CausalOrdering, VectorClock};
pub use conflict::{
    detect_conflict, resolve_conflict, Conflict, ResolutionMode, ResolvedConflict,
};
pub use models::{Change, ChangeOp, EntityKind, EntityRef};
pub use pipeline::{merge_changes, order_changes_by_causality, MergeOutcome, RejectedChange};

use thiserror::Error;

/// Errors surfaced by the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Malformed change for {entity}: {reason}")]
    MalformedChange { entity: String, reason: String },

    #[error("Unknown resolution mode: {0}")]
    UnknownResolutionMode(String),

    #[error("Conflict resolution failed: {0}")]
    ResolutionFailed(String),
}

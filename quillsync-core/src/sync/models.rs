//! Change records: the unit of synchronization.
//!
//! A change is one encrypted mutation to a single entity, stamped with the
//! authoring device's vector clock and a keyed checksum. Changes are
//! immutable once authored; later edits supersede rather than mutate.

use crate::crypto::cipher::EncryptedPayload;
use crate::integrity::IntegrityKey;
use crate::sync::clock::VectorClock;
use crate::sync::SyncError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of syncable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Note,
    Folder,
    Image,
}

/// A typed reference to a syncable entity.
///
/// Tagged per entity kind; device and entity ids never act as map keys with
/// special-cased handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum EntityRef {
    Note(Uuid),
    Folder(Uuid),
    Image(Uuid),
}

impl EntityRef {
    /// The entity kind discriminant.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Note(_) => EntityKind::Note,
            EntityRef::Folder(_) => EntityKind::Folder,
            EntityRef::Image(_) => EntityKind::Image,
        }
    }

    /// The entity id.
    pub fn id(&self) -> Uuid {
        match self {
            EntityRef::Note(id) | EntityRef::Folder(id) | EntityRef::Image(id) => *id,
        }
    }

    /// The same kind of reference pointing at a different id.
    pub fn with_id(&self, id: Uuid) -> EntityRef {
        match self {
            EntityRef::Note(_) => EntityRef::Note(id),
            EntityRef::Folder(_) => EntityRef::Folder(id),
            EntityRef::Image(_) => EntityRef::Image(id),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Note(id) => write!(f, "note/{}", id),
            EntityRef::Folder(id) => write!(f, "folder/{}", id),
            EntityRef::Image(id) => write!(f, "image/{}", id),
        }
    }
}

/// Operation a change applies to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

/// One encrypted mutation to a single entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    /// Which entity this change touches.
    pub entity: EntityRef,

    /// What the change does.
    pub op: ChangeOp,

    /// Opaque ciphertext; `None` only for deletes.
    pub payload: Option<EncryptedPayload>,

    /// The authoring device's clock at time of authorship.
    pub clock: VectorClock,

    /// Originating device id (opaque).
    pub origin_device_id: String,

    /// Wall-clock authorship time, Unix milliseconds. Tie-break only,
    /// never authoritative for ordering.
    pub timestamp: i64,

    /// Keyed checksum over the canonical encoding of the fields above.
    #[serde(with = "crate::integrity::base64_bytes")]
    pub checksum: [u8; 32],
}

impl Change {
    /// Author a change on a device: advance the device's clock component,
    /// stamp the current time, and seal the checksum.
    pub fn author(
        entity: EntityRef,
        op: ChangeOp,
        payload: Option<EncryptedPayload>,
        prior_clock: &VectorClock,
        device_id: &str,
        key: &IntegrityKey,
    ) -> Change {
        let mut change = Change {
            entity,
            op,
            payload,
            clock: prior_clock.increment(device_id),
            origin_device_id: device_id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            checksum: [0u8; 32],
        };
        change.reseal(key);
        change
    }

    /// Recompute the checksum over the current field values.
    ///
    /// Only resolution and sibling-minting paths call this; an authored
    /// change is otherwise immutable.
    pub fn reseal(&mut self, key: &IntegrityKey) {
        self.checksum = key.checksum(&self.canonical_encode());
    }

    /// Verify the stored checksum against the current field values.
    pub fn verify_checksum(&self, key: &IntegrityKey) -> bool {
        use subtle::ConstantTimeEq;
        let expected = key.checksum(&self.canonical_encode());
        expected.ct_eq(&self.checksum).into()
    }

    /// Structural validation, independent of any key.
    ///
    /// Rejects records a merge cannot reason about: an empty clock, a nil
    /// entity id, a missing origin device, or a payload/op mismatch.
    pub fn validate(&self) -> Result<(), SyncError> {
        let malformed = |reason: &str| {
            Err(SyncError::MalformedChange {
                entity: self.entity.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.entity.id().is_nil() {
            return malformed("nil entity id");
        }
        if self.clock.is_empty() {
            return malformed("empty vector clock");
        }
        if self.origin_device_id.is_empty() {
            return malformed("missing origin device id");
        }
        if self.clock.tick_of(&self.origin_device_id) == 0 {
            return malformed("clock has no tick for the origin device");
        }
        match (self.op, &self.payload) {
            (ChangeOp::Delete, Some(_)) => malformed("delete carries a payload"),
            (ChangeOp::Create | ChangeOp::Update, None) => malformed("missing payload"),
            _ => Ok(()),
        }
    }

    /// Deterministic encoding of every field except the checksum itself.
    fn canonical_encode(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.push(match self.entity.kind() {
            EntityKind::Note => 0u8,
            EntityKind::Folder => 1,
            EntityKind::Image => 2,
        });
        out.extend_from_slice(self.entity.id().as_bytes());

        out.push(match self.op {
            ChangeOp::Create => 0u8,
            ChangeOp::Update => 1,
            ChangeOp::Delete => 2,
        });

        match &self.payload {
            None => out.push(0u8),
            Some(p) => {
                out.push(1u8);
                out.extend_from_slice(&p.nonce);
                out.extend_from_slice(&(p.ciphertext.len() as u64).to_le_bytes());
                out.extend_from_slice(&p.ciphertext);
                out.extend_from_slice(&p.auth_tag);
            }
        }

        let entries: Vec<_> = self.clock.entries().collect();
        out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        for (device, tick) in entries {
            out.extend_from_slice(&(device.len() as u64).to_le_bytes());
            out.extend_from_slice(device.as_bytes());
            out.extend_from_slice(&tick.to_le_bytes());
        }

        out.extend_from_slice(&(self.origin_device_id.len() as u64).to_le_bytes());
        out.extend_from_slice(self.origin_device_id.as_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::{encrypt_payload, DataEncryptionKey};
    use crate::integrity::KeyContext;

    fn sync_key() -> IntegrityKey {
        IntegrityKey::derive(&[1u8; 32], KeyContext::Sync)
    }

    fn sample_payload() -> EncryptedPayload {
        let dek = DataEncryptionKey::generate();
        encrypt_payload(&dek, b"note contents").unwrap()
    }

    fn sample_change(key: &IntegrityKey) -> Change {
        Change::author(
            EntityRef::Note(Uuid::new_v4()),
            ChangeOp::Update,
            Some(sample_payload()),
            &VectorClock::new(),
            "device-a",
            key,
        )
    }

    #[test]
    fn author_increments_own_clock_component() {
        let key = sync_key();
        let change = sample_change(&key);

        assert_eq!(change.clock.tick_of("device-a"), 1);
        assert_eq!(change.origin_device_id, "device-a");
        assert!(change.validate().is_ok());
    }

    #[test]
    fn checksum_verifies_and_detects_tampering() {
        let key = sync_key();
        let mut change = sample_change(&key);
        assert!(change.verify_checksum(&key));

        change.timestamp += 1;
        assert!(!change.verify_checksum(&key));
    }

    #[test]
    fn checksum_fails_with_different_key() {
        let key = sync_key();
        let other = IntegrityKey::derive(&[2u8; 32], KeyContext::Sync);
        let change = sample_change(&key);
        assert!(!change.verify_checksum(&other));
    }

    #[test]
    fn validate_rejects_nil_entity_id() {
        let key = sync_key();
        let mut change = sample_change(&key);
        change.entity = EntityRef::Note(Uuid::nil());
        assert!(change.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_clock() {
        let key = sync_key();
        let mut change = sample_change(&key);
        change.clock = VectorClock::new();
        assert!(change.validate().is_err());
    }

    #[test]
    fn validate_rejects_foreign_clock() {
        let key = sync_key();
        let mut change = sample_change(&key);
        // Clock has ticks, but none for the claimed origin device
        change.clock = VectorClock::new().increment("device-b");
        assert!(change.validate().is_err());
    }

    #[test]
    fn validate_rejects_payload_op_mismatch() {
        let key = sync_key();

        let mut deletion = sample_change(&key);
        deletion.op = ChangeOp::Delete;
        assert!(deletion.validate().is_err());

        let mut update = sample_change(&key);
        update.payload = None;
        assert!(update.validate().is_err());
    }

    #[test]
    fn delete_without_payload_is_valid() {
        let key = sync_key();
        let change = Change::author(
            EntityRef::Folder(Uuid::new_v4()),
            ChangeOp::Delete,
            None,
            &VectorClock::new().increment("device-a"),
            "device-a",
            &key,
        );
        assert!(change.validate().is_ok());
    }

    #[test]
    fn entity_ref_with_id_preserves_kind() {
        let id = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        assert_eq!(EntityRef::Note(id).with_id(fresh), EntityRef::Note(fresh));
        assert_eq!(EntityRef::Image(id).with_id(fresh).kind(), EntityKind::Image);
    }

    #[test]
    fn change_serde_is_lossless() {
        let key = sync_key();
        let change = sample_change(&key);

        let json = serde_json::to_string(&change).unwrap();
        let restored: Change = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.entity, change.entity);
        assert_eq!(restored.op, change.op);
        assert_eq!(restored.payload, change.payload);
        assert_eq!(restored.clock, change.clock);
        assert_eq!(restored.timestamp, change.timestamp);
        assert_eq!(restored.checksum, change.checksum);
        assert!(restored.verify_checksum(&key));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["checksum"].is_string());
    }
}

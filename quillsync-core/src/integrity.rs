//! Keyed integrity envelopes over opaque encrypted payloads.
//!
//! An envelope binds a payload to a timestamp with an HMAC-SHA256 checksum.
//! Keys are context-bound: the sync pipeline, backup packaging, and
//! credential storage each use a separately derived key, so a checksum from
//! one context never verifies in another.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Use-context a MAC key is bound to. Key reuse across contexts is
/// disallowed; the context label is mixed into both derivation and MAC input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyContext {
    Sync,
    Backup,
    Credential,
}

impl KeyContext {
    fn label(self) -> &'static [u8] {
        match self {
            KeyContext::Sync => b"quillsync/integrity/sync/v1",
            KeyContext::Backup => b"quillsync/integrity/backup/v1",
            KeyContext::Credential => b"quillsync/integrity/credential/v1",
        }
    }
}

/// A context-bound MAC key.
pub struct IntegrityKey {
    key: [u8; 32],
    context: KeyContext,
}

impl IntegrityKey {
    /// Derive a context key from root key material via HKDF-SHA256.
    ///
    /// Distinct contexts yield unrelated keys from the same root.
    pub fn derive(root: &[u8; 32], context: KeyContext) -> Self {
        let hk = hkdf::Hkdf::<Sha256>::new(None, root);
        let mut key = [0u8; 32];
        hk.expand(context.label(), &mut key)
            .unwrap_or_else(|_| unreachable!("HKDF output length is fixed"));
        Self { key, context }
    }

    /// Create a key from raw bytes already scoped to a context.
    pub fn from_bytes(key: [u8; 32], context: KeyContext) -> Self {
        Self { key, context }
    }

    /// The context this key is bound to.
    pub fn context(&self) -> KeyContext {
        self.context
    }

    /// Compute a keyed checksum over an arbitrary message.
    ///
    /// The context label is prepended so the same bytes MAC'd under a
    /// different context never collide.
    pub fn checksum(&self, message: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(self.context.label());
        mac.update(message);
        mac.finalize().into_bytes().into()
    }
}

impl Drop for IntegrityKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// A payload plus keyed checksum and timestamp.
///
/// Valid iff recomputing the checksum over (payload, timestamp) matches the
/// stored value; any mutation to either invalidates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityEnvelope {
    /// The wrapped payload (opaque to the envelope).
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,

    /// Wall-clock capture time, Unix milliseconds.
    pub timestamp: i64,

    /// HMAC-SHA256 over the canonical encoding of (payload, timestamp).
    #[serde(with = "base64_bytes")]
    pub checksum: [u8; 32],
}

/// Outcome of verifying an envelope against a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Checksum matched; the payload is trusted.
    Valid(Vec<u8>),
    /// Checksum mismatch; the payload is withheld.
    Invalid,
}

impl Verification {
    /// Whether the envelope verified.
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }

    /// The payload, if and only if verification succeeded.
    pub fn into_payload(self) -> Option<Vec<u8>> {
        match self {
            Verification::Valid(payload) => Some(payload),
            Verification::Invalid => None,
        }
    }
}

impl IntegrityEnvelope {
    /// Wrap a payload, stamping the current time.
    pub fn wrap(payload: Vec<u8>, key: &IntegrityKey) -> Self {
        Self::wrap_at(payload, chrono::Utc::now().timestamp_millis(), key)
    }

    /// Wrap a payload with an explicit timestamp.
    pub fn wrap_at(payload: Vec<u8>, timestamp: i64, key: &IntegrityKey) -> Self {
        let checksum = key.checksum(&canonical_encode(&payload, timestamp));
        Self {
            payload,
            timestamp,
            checksum,
        }
    }

    /// Recompute and compare the checksum in constant time.
    ///
    /// On mismatch the payload is discarded, never partially trusted.
    pub fn verify(&self, key: &IntegrityKey) -> Verification {
        let expected = key.checksum(&canonical_encode(&self.payload, self.timestamp));
        if expected.ct_eq(&self.checksum).into() {
            Verification::Valid(self.payload.clone())
        } else {
            Verification::Invalid
        }
    }
}

/// Deterministic encoding of (payload, timestamp): length-prefixed payload
/// followed by the little-endian timestamp. Stable field order keeps the
/// same logical content at the same checksum.
fn canonical_encode(payload: &[u8], timestamp: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len() + 8);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&timestamp.to_le_bytes());
    out
}

/// Custom base64 serialization for persisted byte fields, both `Vec<u8>`
/// and fixed-size arrays.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: &T, s: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]> + ?Sized,
        S: Serializer,
    {
        s.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, T, D>(d: D) -> Result<T, D::Error>
    where
        T: TryFrom<Vec<u8>>,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        let bytes = STANDARD.decode(&s).map_err(serde::de::Error::custom)?;
        T::try_from(bytes).map_err(|_| serde::de::Error::custom("invalid byte length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_key() -> IntegrityKey {
        IntegrityKey::derive(&[42u8; 32], KeyContext::Sync)
    }

    #[test]
    fn wrap_verify_roundtrip() {
        let key = sync_key();
        let envelope = IntegrityEnvelope::wrap(b"ciphertext blob".to_vec(), &key);

        let verification = envelope.verify(&key);
        assert!(verification.is_valid());
        assert_eq!(verification.into_payload().unwrap(), b"ciphertext blob");
    }

    #[test]
    fn payload_bit_flip_invalidates() {
        let key = sync_key();
        let mut envelope = IntegrityEnvelope::wrap(vec![0xAB; 64], &key);

        envelope.payload[10] ^= 0x01;
        let verification = envelope.verify(&key);
        assert!(!verification.is_valid());
        assert!(verification.into_payload().is_none());
    }

    #[test]
    fn checksum_bit_flip_invalidates() {
        let key = sync_key();
        let mut envelope = IntegrityEnvelope::wrap(vec![0xAB; 64], &key);

        envelope.checksum[0] ^= 0x80;
        assert!(!envelope.verify(&key).is_valid());
    }

    #[test]
    fn timestamp_mutation_invalidates() {
        let key = sync_key();
        let mut envelope = IntegrityEnvelope::wrap(vec![1, 2, 3], &key);

        envelope.timestamp += 1;
        assert!(!envelope.verify(&key).is_valid());
    }

    #[test]
    fn different_key_never_verifies() {
        let key = sync_key();
        let other = IntegrityKey::derive(&[43u8; 32], KeyContext::Sync);

        let envelope = IntegrityEnvelope::wrap(b"data".to_vec(), &key);
        assert!(!envelope.verify(&other).is_valid());
    }

    #[test]
    fn cross_context_key_never_verifies() {
        // Same root, different context: derivation and MAC label both differ
        let sync = IntegrityKey::derive(&[42u8; 32], KeyContext::Sync);
        let backup = IntegrityKey::derive(&[42u8; 32], KeyContext::Backup);

        let envelope = IntegrityEnvelope::wrap(b"data".to_vec(), &sync);
        assert!(!envelope.verify(&backup).is_valid());
    }

    #[test]
    fn deterministic_checksum_for_same_content() {
        let key = sync_key();
        let a = IntegrityEnvelope::wrap_at(b"same".to_vec(), 1_700_000_000_000, &key);
        let b = IntegrityEnvelope::wrap_at(b"same".to_vec(), 1_700_000_000_000, &key);
        assert_eq!(a.checksum, b.checksum);
    }

    #[test]
    fn envelope_serde_roundtrip() {
        let key = sync_key();
        let envelope = IntegrityEnvelope::wrap_at(vec![9u8; 32], 1_700_000_000_000, &key);

        let json = serde_json::to_string(&envelope).unwrap();
        let restored: IntegrityEnvelope = serde_json::from_str(&json).unwrap();

        assert!(restored.verify(&key).is_valid());
        assert_eq!(restored.timestamp, envelope.timestamp);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["payload"].is_string());
        assert!(value["checksum"].is_string());
    }
}

//! Zeroization utilities for secrets held outside the key types.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A byte buffer that zeroizes on drop.
///
/// Used for passwords and recovery phrases in transit between the caller
/// and the key derivation functions.
#[derive(ZeroizeOnDrop)]
pub struct SecureBuffer {
    data: Vec<u8>,
}

impl SecureBuffer {
    /// Create a secure buffer from raw bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Length of the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the inner bytes (use carefully).
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for SecureBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<String> for SecureBuffer {
    fn from(mut s: String) -> Self {
        let data = s.as_bytes().to_vec();
        s.zeroize();
        Self { data }
    }
}

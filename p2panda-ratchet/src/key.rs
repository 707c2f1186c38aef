// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-size key material used throughout the ratchet.
#[cfg(not(test))]
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

use crate::crypto::x25519::PublicKey;

/// 256-bit key size.
pub const KEY_SIZE: usize = 32;

/// Opaque 32-byte key.
///
/// The same type is used for root-, chain-, message- and header keys and as the index of skipped
/// message keys (the remote DH public key or the receiving header key).
///
/// Keys are treated as secret material:
/// 1. Memory gets zeroised on drop.
/// 2. Bytes are hidden when printing debug info.
/// 3. Equality is checked in constant time.
#[derive(Clone, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
#[cfg_attr(test, derive(Debug))]
pub struct Key(#[serde(with = "serde_bytes")] [u8; KEY_SIZE]);

impl Key {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes, for example to persist them in a storage backend.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl From<PublicKey> for Key {
    fn from(public_key: PublicKey) -> Self {
        Self(public_key.to_bytes())
    }
}

impl From<&PublicKey> for Key {
    fn from(public_key: &PublicKey) -> Self {
        Self(public_key.to_bytes())
    }
}

#[cfg(not(test))]
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not reveal secret values when printing debug info.
        f.debug_tuple("Key").field(&"***").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::crypto::x25519::PublicKey;

    use super::Key;

    #[test]
    fn equality_and_hashing() {
        let key_1 = Key::from_bytes([1; 32]);
        let key_2 = Key::from_bytes([1; 32]);
        let key_3 = Key::from_bytes([2; 32]);

        assert_eq!(key_1, key_2);
        assert_ne!(key_1, key_3);

        let set = HashSet::from([key_1, key_2, key_3]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn index_key_from_public_key() {
        let public_key = PublicKey::from_bytes([7; 32]);
        assert_eq!(Key::from(public_key).as_bytes(), public_key.as_bytes());
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Elliptic-curve Diffie–Hellman (ECDH) key agreement scheme (X25519).
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::Key;

/// 256-bit secret key size.
pub const SECRET_KEY_SIZE: usize = 32;

/// 256-bit public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Secret Curve25519 key used for ECDH key agreement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey(Key);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        // Clamping
        let mut bytes = bytes;
        bytes[0] &= 248u8;
        bytes[31] &= 127u8;
        bytes[31] |= 64u8;
        SecretKey(Key::from_bytes(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        self.0.as_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        let secret = x25519_dalek::StaticSecret::from(*self.as_bytes());
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    /// Computes the shared secret with the other party's public key.
    ///
    /// Fails if the other party's key is a low-order point which would result in an all-zero,
    /// non-contributory shared secret.
    pub fn calculate_agreement(&self, their_public: &PublicKey) -> Result<Key, X25519Error> {
        let secret = x25519_dalek::StaticSecret::from(*self.as_bytes());
        let shared_secret =
            secret.diffie_hellman(&x25519_dalek::PublicKey::from(their_public.to_bytes()));
        if !shared_secret.was_contributory() {
            return Err(X25519Error::NonContributory);
        }
        Ok(Key::from_bytes(shared_secret.to_bytes()))
    }
}

/// Public Curve25519 key used for ECDH key agreement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(public_key: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(public_key)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Key pair used as our current ratchet key.
///
/// Exactly one pair is held by a ratchet at any time. It gets replaced by a freshly generated one
/// on every DH ratchet step, the old secret is dropped (and zeroised) with it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhPair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl DhPair {
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn private_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

#[derive(Debug, Error)]
pub enum X25519Error {
    #[error("diffie-hellman with low-order point resulted in non-contributory shared secret")]
    NonContributory,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Provider;

    use super::{DhPair, PublicKey, SecretKey, X25519Error};

    #[test]
    fn diffie_hellmann() {
        let rng = Provider::from_seed([1; 32]);

        let alice = DhPair::from_secret_key(SecretKey::from_bytes(rng.random_array().unwrap()));
        let bob = DhPair::from_secret_key(SecretKey::from_bytes(rng.random_array().unwrap()));

        let alice_shared_secret = alice
            .private_key()
            .calculate_agreement(bob.public_key())
            .unwrap();
        let bob_shared_secret = bob
            .private_key()
            .calculate_agreement(alice.public_key())
            .unwrap();

        assert_eq!(alice_shared_secret, bob_shared_secret);
    }

    #[test]
    fn reject_low_order_point() {
        let rng = Provider::from_seed([1; 32]);
        let secret_key = SecretKey::from_bytes(rng.random_array().unwrap());

        let result = secret_key.calculate_agreement(&PublicKey::from_bytes([0; 32]));
        assert!(matches!(result, Err(X25519Error::NonContributory)));
    }
}

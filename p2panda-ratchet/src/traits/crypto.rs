// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::crypto::CryptoError;
use crate::crypto::x25519::{DhPair, PublicKey};
use crate::key::Key;

/// Cryptographic capabilities required by the ratchet.
///
/// A default implementation is given by [`Provider`](crate::crypto::Provider). Applications can
/// inject their own implementation when constructing a session, for example to use different
/// algorithms or a deterministic fake in tests.
pub trait Crypto {
    /// Generates a new Diffie-Hellman key pair.
    fn generate_dh(&self) -> Result<DhPair, CryptoError>;

    /// Returns the shared secret of our key pair and the other party's public key.
    fn dh(&self, our_pair: &DhPair, their_public_key: &PublicKey) -> Result<Key, CryptoError>;

    /// Authenticated encryption of `plaintext`, binding `aad` to the ciphertext.
    fn encrypt(&self, key: &Key, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Authenticated decryption, fails if the key, ciphertext or `aad` do not match.
    fn decrypt(&self, key: &Key, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Root chain step: derives the next root key, a new chain key and a new header key from the
    /// current root key and a Diffie-Hellman output.
    fn kdf_rk(&self, root_key: &Key, dh_output: &Key) -> Result<(Key, Key, Key), CryptoError>;

    /// Symmetric chain step: derives the next chain key and a message key from the current chain
    /// key.
    fn kdf_ck(&self, chain_key: &Key) -> Result<(Key, Key), CryptoError>;
}

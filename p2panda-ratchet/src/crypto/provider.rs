// SPDX-License-Identifier: MIT OR Apache-2.0

//! Default cryptographic algorithms and secure random number provider for `p2panda-ratchet`.
//!
//! Following algorithms are used:
//! * ChaCha random number generator with 20 rounds
//! * ECDH key agreement with X25519
//! * XChaCha20-Poly1305 AEAD with random 192-bit nonces
//! * HKDF with SHA256 for root- and chain key derivation
use std::sync::RwLock;

use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::crypto::x25519::{DhPair, PublicKey, SecretKey, X25519Error};
use crate::crypto::xchacha20::{
    NONCE_SIZE, XAeadError, XAeadNonce, x_aead_decrypt, x_aead_encrypt,
};
use crate::key::{KEY_SIZE, Key};
use crate::traits::Crypto;

/// Domain separation for root chain steps.
const ROOT_INFO: &[u8] = b"p2panda-ratchet root";

/// Salt to derive the message key from a chain key.
const MESSAGE_KEY_SALT: &[u8] = b"message";

/// Salt to derive the next chain key from a chain key.
const CHAIN_KEY_SALT: &[u8] = b"chain";

#[derive(Debug)]
pub struct Provider {
    rng: RwLock<rand_chacha::ChaCha20Rng>,
}

impl Default for Provider {
    fn default() -> Self {
        Self {
            rng: RwLock::new(rand_chacha::ChaCha20Rng::from_os_rng()),
        }
    }
}

#[cfg(any(test, feature = "test_utils"))]
impl Provider {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: RwLock::new(rand_chacha::ChaCha20Rng::from_seed(seed)),
        }
    }
}

impl Provider {
    pub fn random_array<const N: usize>(&self) -> Result<[u8; N], RngError> {
        let mut rng = self.rng.write().map_err(|_| RngError::LockPoisoned)?;
        let mut out = [0u8; N];
        rng.try_fill_bytes(&mut out)
            .map_err(|_| RngError::NotEnoughRandomness)?;
        Ok(out)
    }
}

impl Crypto for Provider {
    fn generate_dh(&self) -> Result<DhPair, CryptoError> {
        let secret_key = SecretKey::from_bytes(self.random_array()?);
        Ok(DhPair::from_secret_key(secret_key))
    }

    fn dh(&self, our_pair: &DhPair, their_public_key: &PublicKey) -> Result<Key, CryptoError> {
        let shared_secret = our_pair
            .private_key()
            .calculate_agreement(their_public_key)?;
        Ok(shared_secret)
    }

    fn encrypt(&self, key: &Key, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce: XAeadNonce = self.random_array()?;
        let ciphertext = x_aead_encrypt(key.as_bytes(), plaintext, nonce, aad)?;

        // Prepend nonce, the receiver needs it for decryption.
        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    fn decrypt(&self, key: &Key, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(XAeadError::InvalidLength(ciphertext.len()).into());
        }
        let (nonce, ciphertext_tag) = ciphertext.split_at(NONCE_SIZE);
        let mut nonce_bytes: XAeadNonce = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);
        let plaintext = x_aead_decrypt(key.as_bytes(), ciphertext_tag, nonce_bytes, aad)?;
        Ok(plaintext)
    }

    fn kdf_rk(&self, root_key: &Key, dh_output: &Key) -> Result<(Key, Key, Key), CryptoError> {
        let mut okm: [u8; 3 * KEY_SIZE] =
            hkdf(root_key.as_bytes(), dh_output.as_bytes(), ROOT_INFO)?;
        let output = (
            key_from_slice(&okm[..KEY_SIZE]),
            key_from_slice(&okm[KEY_SIZE..2 * KEY_SIZE]),
            key_from_slice(&okm[2 * KEY_SIZE..]),
        );
        okm.zeroize();
        Ok(output)
    }

    fn kdf_ck(&self, chain_key: &Key) -> Result<(Key, Key), CryptoError> {
        let message_key = hkdf(MESSAGE_KEY_SALT, chain_key.as_bytes(), &[])?;
        let next_chain_key = hkdf(CHAIN_KEY_SALT, chain_key.as_bytes(), &[])?;
        Ok((Key::from_bytes(next_chain_key), Key::from_bytes(message_key)))
    }
}

fn key_from_slice(bytes: &[u8]) -> Key {
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(bytes);
    Key::from_bytes(key)
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    XAead(#[from] XAeadError),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Rng(#[from] RngError),
}

#[derive(Debug, Error)]
pub enum RngError {
    #[error("rng lock is poisoned")]
    LockPoisoned,

    #[error("unable to collect enough randomness")]
    NotEnoughRandomness,
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! XChaCha20Poly1305 is a ChaCha20Poly1305 AEAD variant with an extended 192-bit (24-byte) nonce.
//!
//! The extended nonce is large enough to be picked at random for every message, which is required
//! for header keys as they encrypt many headers during one ratchet epoch.
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use thiserror::Error;

pub const NONCE_SIZE: usize = 24;

pub const TAG_SIZE: usize = 16;

pub type XAeadNonce = [u8; NONCE_SIZE];

pub type XAeadKey = [u8; 32];

pub fn x_aead_encrypt(
    key: &XAeadKey,
    plaintext: &[u8],
    nonce: XAeadNonce,
    aad: &[u8],
) -> Result<Vec<u8>, XAeadError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut ciphertext: Vec<u8> = Vec::from(plaintext);
    cipher
        .encrypt_in_place(XNonce::from_slice(&nonce), aad, &mut ciphertext)
        .map_err(XAeadError::Encrypt)?;
    Ok(ciphertext)
}

pub fn x_aead_decrypt(
    key: &XAeadKey,
    ciphertext_tag: &[u8],
    nonce: XAeadNonce,
    aad: &[u8],
) -> Result<Vec<u8>, XAeadError> {
    if ciphertext_tag.len() < TAG_SIZE {
        return Err(XAeadError::InvalidLength(ciphertext_tag.len()));
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut plaintext: Vec<u8> = Vec::from(ciphertext_tag);
    cipher
        .decrypt_in_place(XNonce::from_slice(&nonce), aad, &mut plaintext)
        .map_err(XAeadError::Decrypt)?;
    Ok(plaintext)
}

#[derive(Debug, Error)]
pub enum XAeadError {
    #[error("could not encrypt with xchacha20poly1305 aead: {0}")]
    Encrypt(chacha20poly1305::Error),

    #[error("could not decrypt with xchacha20poly1305 aead: {0}")]
    Decrypt(chacha20poly1305::Error),

    #[error("ciphertext of {0} bytes is too short")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Provider;

    use super::{XAeadError, XAeadKey, XAeadNonce, x_aead_decrypt, x_aead_encrypt};

    #[test]
    fn encrypt_decrypt() {
        let rng = Provider::from_seed([1; 32]);

        let key: XAeadKey = rng.random_array().unwrap();
        let nonce: XAeadNonce = rng.random_array().unwrap();

        let ciphertext = x_aead_encrypt(&key, b"Hello, Panda!", nonce, b"ad").unwrap();
        let plaintext = x_aead_decrypt(&key, &ciphertext, nonce, b"ad").unwrap();

        assert_eq!(plaintext, b"Hello, Panda!");
    }

    #[test]
    fn associated_data_is_authenticated() {
        let rng = Provider::from_seed([1; 32]);

        let key: XAeadKey = rng.random_array().unwrap();
        let nonce: XAeadNonce = rng.random_array().unwrap();

        let ciphertext = x_aead_encrypt(&key, b"Hello, Panda!", nonce, b"ad").unwrap();

        assert!(matches!(
            x_aead_decrypt(&key, &ciphertext, nonce, b"other ad"),
            Err(XAeadError::Decrypt(_))
        ));
        assert!(matches!(
            x_aead_decrypt(&key, &ciphertext[..4], nonce, b"ad"),
            Err(XAeadError::InvalidLength(4))
        ));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hashed Message Authentication Code (HMAC)-based key derivation function (HKDF) with SHA256.
//!
//! <https://www.rfc-editor.org/rfc/rfc5869>
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

/// Extract-and-expand `N` bytes of key material from `ikm`, using `salt` as the extraction key.
pub fn hkdf<const N: usize>(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; N], HkdfError> {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = [0u8; N];
    hk.expand(info, &mut okm)
        .map_err(|_| HkdfError::InvalidLength(N))?;
    Ok(okm)
}

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("can not expand {0} bytes of key material with hkdf")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use super::{HkdfError, hkdf};

    #[test]
    fn salt_and_info_separate_outputs() {
        let result_1: [u8; 32] = hkdf(b"root", b"ikm", b"info").unwrap();
        let result_2: [u8; 32] = hkdf(b"root", b"ikm", b"info").unwrap();
        let result_3: [u8; 32] = hkdf(b"chain", b"ikm", b"info").unwrap();
        let result_4: [u8; 32] = hkdf(b"root", b"ikm", b"other").unwrap();

        assert_eq!(result_1, result_2);
        assert_ne!(result_1, result_3);
        assert_ne!(result_1, result_4);
    }

    #[test]
    fn output_too_large() {
        let result = hkdf::<{ 255 * 32 + 1 }>(b"salt", b"ikm", b"");
        assert!(matches!(result, Err(HkdfError::InvalidLength(8161))));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message headers and the messages exchanged between two sessions.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::x25519::{PUBLIC_KEY_SIZE, PublicKey};

/// Size of an encoded header: message number, previous chain length and DH public key.
pub const HEADER_SIZE: usize = 4 + 4 + PUBLIC_KEY_SIZE;

/// Metadata the receiver needs to find the right key for a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Sender's current ratchet public key.
    pub dh: PublicKey,

    /// Message number in the sending chain.
    pub n: u32,

    /// Length of the sender's previous sending chain.
    pub pn: u32,
}

impl MessageHeader {
    pub fn new(dh: PublicKey, n: u32, pn: u32) -> Self {
        Self { dh, n, pn }
    }

    /// Canonical encoding, used as associated data and as plaintext of encrypted headers.
    ///
    /// ```text
    /// ┌──────────┬───────────┬────────────────────┐
    /// │ n (u32)  │ pn (u32)  │ dh public key      │
    /// │ 4 bytes  │ 4 bytes   │ 32 bytes           │
    /// └──────────┴───────────┴────────────────────┘
    /// ```
    ///
    /// Counters are little-endian.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.n.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.pn.to_le_bytes());
        bytes[8..].copy_from_slice(self.dh.as_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        let bytes: &[u8; HEADER_SIZE] = bytes
            .try_into()
            .map_err(|_| HeaderError::InvalidLength(bytes.len()))?;

        let mut n = [0u8; 4];
        n.copy_from_slice(&bytes[0..4]);
        let mut pn = [0u8; 4];
        pn.copy_from_slice(&bytes[4..8]);
        let mut dh = [0u8; PUBLIC_KEY_SIZE];
        dh.copy_from_slice(&bytes[8..]);

        Ok(Self {
            dh: PublicKey::from_bytes(dh),
            n: u32::from_le_bytes(n),
            pn: u32::from_le_bytes(pn),
        })
    }
}

/// Message of a plain session, the header travels unencrypted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,

    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Message of a header-encrypted session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHe {
    /// Encrypted [`MessageHeader`].
    #[serde(with = "serde_bytes")]
    pub header: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("header needs to be 40 bytes, got {0}")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use crate::crypto::x25519::PublicKey;

    use super::{HEADER_SIZE, HeaderError, MessageHeader};

    #[test]
    fn fixed_layout() {
        let header = MessageHeader::new(PublicKey::from_bytes([9; 32]), 1, 258);
        let bytes = header.encode();

        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[2, 1, 0, 0]);
        assert_eq!(&bytes[8..], &[9; 32]);

        assert_eq!(MessageHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn invalid_length() {
        let header = MessageHeader::new(PublicKey::from_bytes([9; 32]), 1, 2);
        let bytes = header.encode();

        assert!(matches!(
            MessageHeader::decode(&bytes[1..]),
            Err(HeaderError::InvalidLength(39))
        ));
        assert!(matches!(
            MessageHeader::decode(&[]),
            Err(HeaderError::InvalidLength(0))
        ));
    }
}

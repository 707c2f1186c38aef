// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error as StdError;

use thiserror::Error;

use crate::cbor::{DecodeError, EncodeError};
use crate::ratchet::RatchetState;

/// Storage to persist ratchet state of sessions.
///
/// Sessions save their state whenever an encryption or decryption changed it, after all skipped
/// message keys have been written to the keys storage.
pub trait SessionStorage {
    fn save(&self, session_id: &[u8], state: &RatchetState) -> Result<(), SessionStorageError>;

    fn load(&self, session_id: &[u8]) -> Result<Option<RatchetState>, SessionStorageError>;
}

#[derive(Debug, Error)]
pub enum SessionStorageError {
    #[error("session storage lock is poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("session storage backend failed: {0}")]
    Backend(Box<dyn StdError + Send + Sync>),
}

// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::RwLock;

use crate::cbor::{decode_cbor, encode_cbor};
use crate::ratchet::RatchetState;
use crate::traits::{SessionStorage, SessionStorageError};

/// In-memory storage for ratchet states, encoded as CBOR.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    sessions: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn save(&self, session_id: &[u8], state: &RatchetState) -> Result<(), SessionStorageError> {
        let bytes = encode_cbor(state)?;
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| SessionStorageError::LockPoisoned)?;
        sessions.insert(session_id.to_vec(), bytes);
        Ok(())
    }

    fn load(&self, session_id: &[u8]) -> Result<Option<RatchetState>, SessionStorageError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| SessionStorageError::LockPoisoned)?;
        match sessions.get(session_id) {
            Some(bytes) => Ok(Some(decode_cbor(bytes)?)),
            None => Ok(None),
        }
    }
}

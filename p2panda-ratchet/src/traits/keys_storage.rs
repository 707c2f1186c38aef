// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::error::Error as StdError;

use thiserror::Error;

use crate::key::Key;

/// Message keys of all skipped messages, grouped by their index key and message number.
pub type AllMessageKeys = HashMap<Key, HashMap<u32, Key>>;

/// Storage for message keys of skipped messages.
///
/// Keys get stored when messages arrive out-of-order or get lost. They are indexed by an "index
/// key" (the sender's DH public key for plain sessions, the receiving header key for
/// header-encrypted sessions) and the message number. Every record additionally carries the id of
/// the session it belongs to and a per-session, monotonically increasing sequence number which is
/// used for eviction.
///
/// One store can be shared between many sessions. Implementations need to guard concurrent access
/// across sessions themselves.
///
/// Writes need to be completed when a method returns, as the session commits its new ratchet state
/// right afterwards.
pub trait KeysStorage {
    /// Returns the message key for the given index key and message number if it exists.
    fn get(&self, index_key: &Key, message_number: u32) -> Result<Option<Key>, KeysStorageError>;

    /// Inserts or replaces a message key.
    fn put(
        &self,
        session_id: &[u8],
        index_key: &Key,
        message_number: u32,
        message_key: &Key,
        sequence_number: u64,
    ) -> Result<(), KeysStorageError>;

    /// Removes a message key, does nothing if it doesn't exist.
    fn delete_mk(&self, index_key: &Key, message_number: u32) -> Result<(), KeysStorageError>;

    /// Number of message keys stored under an index key.
    fn count(&self, index_key: &Key) -> Result<usize, KeysStorageError>;

    /// Deletes the oldest message keys of a session (by sequence number) until at most `max_keys`
    /// remain.
    fn truncate_mks(&self, session_id: &[u8], max_keys: usize) -> Result<(), KeysStorageError>;

    /// Deletes all message keys of a session with a sequence number lower or equal to
    /// `delete_until`.
    fn delete_old_mks(&self, session_id: &[u8], delete_until: u64)
    -> Result<(), KeysStorageError>;

    /// Returns all stored message keys.
    ///
    /// This is required for header-encrypted sessions, where the index key of a message can only
    /// be learned by trying to decrypt its header with each stored header key.
    fn all(&self) -> Result<AllMessageKeys, KeysStorageError>;
}

#[derive(Debug, Error)]
pub enum KeysStorageError {
    #[error("keys storage lock is poisoned")]
    LockPoisoned,

    #[error("keys storage backend failed: {0}")]
    Backend(Box<dyn StdError + Send + Sync>),
}

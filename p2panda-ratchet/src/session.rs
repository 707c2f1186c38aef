// SPDX-License-Identifier: MIT OR Apache-2.0

//! Double Ratchet session with plain headers.
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::{Config, ConfigError, Options, SharedSessionStorage};
use crate::crypto::Provider;
use crate::crypto::x25519::{DhPair, PublicKey};
use crate::header::Message;
use crate::key::Key;
use crate::ratchet::{DoubleRatchet, KeysUpdate, RatchetError, RatchetState};
use crate::storage::MemoryKeysStorage;
use crate::traits::{Crypto, KeysStorage, KeysStorageError, SessionStorageError};

pub type SessionResult<T> = Result<T, SessionError>;

/// Live ratchet state of a session together with its capabilities.
///
/// The state is only replaced after new skipped keys were inserted and the new state persisted.
/// Errors leave the live state untouched. Keys are only deleted from the storage after the
/// new state was committed.
pub(crate) struct Handle<C, K> {
    id: Vec<u8>,
    state: RatchetState,
    config: Config,
    crypto: Arc<C>,
    keys_storage: Arc<K>,
    session_storage: Option<SharedSessionStorage>,
}

impl<C, K> Handle<C, K>
where
    C: Crypto,
    K: KeysStorage,
{
    pub(crate) fn new(
        id: &[u8],
        state: RatchetState,
        options: Options<C, K>,
    ) -> SessionResult<Self> {
        let handle = Self {
            id: id.to_vec(),
            state,
            config: options.config,
            crypto: options.crypto,
            keys_storage: options.keys_storage,
            session_storage: options.session_storage,
        };
        handle.persist(&handle.state)?;
        debug!(
            session_id = %handle.id_hex(),
            header_encryption = handle.state.is_header_encrypted(),
            "created session"
        );
        Ok(handle)
    }

    pub(crate) fn load(
        id: &[u8],
        header_encryption: bool,
        options: Options<C, K>,
    ) -> SessionResult<Option<Self>> {
        let session_storage = options
            .session_storage
            .clone()
            .ok_or(ConfigError::MissingSessionStorage)?;

        let Some(state) = session_storage.load(id)? else {
            return Ok(None);
        };

        if state.is_header_encrypted() != header_encryption {
            return Err(ConfigError::SessionKindMismatch(hex::encode(id)).into());
        }

        debug!(session_id = %hex::encode(id), step = state.step(), "loaded session");

        Ok(Some(Self {
            id: id.to_vec(),
            state,
            config: options.config,
            crypto: options.crypto,
            keys_storage: options.keys_storage,
            session_storage: Some(session_storage),
        }))
    }

    pub(crate) fn id(&self) -> &[u8] {
        &self.id
    }

    pub(crate) fn id_hex(&self) -> String {
        hex::encode(&self.id)
    }

    pub(crate) fn state(&self) -> &RatchetState {
        &self.state
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn crypto(&self) -> &C {
        &self.crypto
    }

    pub(crate) fn keys_storage(&self) -> &K {
        &self.keys_storage
    }

    /// Commits the state after encrypting a message.
    pub(crate) fn encrypted(&mut self, state: RatchetState) -> SessionResult<()> {
        trace!(
            session_id = %self.id_hex(),
            n = ?state.sending_n(),
            "encrypted message"
        );
        self.commit(state, KeysUpdate::default())
    }

    /// Commits the state after decrypting a message.
    pub(crate) fn decrypted(
        &mut self,
        state: RatchetState,
        update: KeysUpdate,
    ) -> SessionResult<()> {
        if state.step() != self.state.step() {
            debug!(
                session_id = %self.id_hex(),
                step = state.step(),
                their_public_key = ?state.their_public_key().map(|key| key.to_hex()),
                "dh ratchet step"
            );
        }

        if update.consumed.is_some() {
            trace!(session_id = %self.id_hex(), "decrypted message with skipped key");
        } else {
            trace!(
                session_id = %self.id_hex(),
                n = ?state.receiving_n(),
                skipped = update.skipped.len(),
                "decrypted message"
            );
        }

        self.commit(state, update)
    }

    /// Logs a rejected message and passes the error on.
    pub(crate) fn rejected(&self, err: RatchetError) -> SessionError {
        debug!(session_id = %self.id_hex(), "rejected message: {err}");
        err.into()
    }

    fn commit(&mut self, state: RatchetState, update: KeysUpdate) -> SessionResult<()> {
        self.insert_skipped(&update)?;

        // Stored keys were used, the ratchet did not move.
        if update.consumed.is_none() {
            self.persist(&state)?;
        }
        self.state = state;

        // Deletions only happen after the new state is committed. Failing here leaves some
        // keys behind until the next eviction, the message itself is already decrypted.
        if let Err(err) = self.delete_keys(&update) {
            warn!(session_id = %self.id_hex(), "could not delete skipped keys: {err}");
        }

        Ok(())
    }

    fn insert_skipped(&self, update: &KeysUpdate) -> Result<(), KeysStorageError> {
        for skipped in &update.skipped {
            self.keys_storage.put(
                &self.id,
                &skipped.index_key,
                skipped.message_number,
                &skipped.message_key,
                skipped.sequence_number,
            )?;
        }
        Ok(())
    }

    fn delete_keys(&self, update: &KeysUpdate) -> Result<(), KeysStorageError> {
        if let Some((index_key, message_number)) = &update.consumed {
            self.keys_storage.delete_mk(index_key, *message_number)?;
        }

        if let Some(delete_until) = update.delete_until {
            debug!(
                session_id = %self.id_hex(),
                delete_until,
                "delete skipped keys of retired chains"
            );
            self.keys_storage.delete_old_mks(&self.id, delete_until)?;
        }

        if update.truncate {
            self.keys_storage
                .truncate_mks(&self.id, self.config.max_message_keys_per_session)?;
        }

        Ok(())
    }

    fn persist(&self, state: &RatchetState) -> Result<(), SessionStorageError> {
        match &self.session_storage {
            Some(session_storage) => session_storage.save(&self.id, state),
            None => Ok(()),
        }
    }
}

impl<C, K> fmt::Debug for Handle<C, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &hex::encode(&self.id))
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Double Ratchet session with plain headers.
///
/// The message header (ratchet public key and message numbers) is sent unencrypted next to the
/// ciphertext but authenticated as part of the associated data.
///
/// ```
/// use p2panda_ratchet::{Crypto, Key, Options, Provider, Session};
///
/// let crypto = Provider::default();
/// let shared_key = Key::from_bytes([1; 32]);
/// let bob_pair = crypto.generate_dh().unwrap();
///
/// let mut alice = Session::new_with_remote_key(
///     b"alice",
///     shared_key.clone(),
///     *bob_pair.public_key(),
///     Options::default(),
/// )
/// .unwrap();
/// let mut bob = Session::new(b"bob", shared_key, bob_pair, Options::default()).unwrap();
///
/// let message = alice.ratchet_encrypt(b"hello", b"").unwrap();
/// assert_eq!(bob.ratchet_decrypt(&message, b"").unwrap(), b"hello");
/// ```
#[derive(Debug)]
pub struct Session<C = Provider, K = MemoryKeysStorage> {
    handle: Handle<C, K>,
}

impl<C, K> Session<C, K>
where
    C: Crypto,
    K: KeysStorage,
{
    /// Creates a session with our initial ratchet key pair, the other party is expected to send
    /// the first message.
    pub fn new(
        id: &[u8],
        shared_key: Key,
        our_pair: DhPair,
        options: Options<C, K>,
    ) -> SessionResult<Self> {
        let state = DoubleRatchet::init(shared_key, our_pair);
        Ok(Self {
            handle: Handle::new(id, state, options)?,
        })
    }

    /// Creates a session knowing the other party's initial ratchet public key. We can send right
    /// away.
    pub fn new_with_remote_key(
        id: &[u8],
        shared_key: Key,
        their_public_key: PublicKey,
        options: Options<C, K>,
    ) -> SessionResult<Self> {
        let state =
            DoubleRatchet::init_with_remote_key(shared_key, their_public_key, &*options.crypto)?;
        Ok(Self {
            handle: Handle::new(id, state, options)?,
        })
    }

    /// Restores a session from the configured session storage.
    ///
    /// Returns `None` if no session with this id was persisted.
    pub fn load(id: &[u8], options: Options<C, K>) -> SessionResult<Option<Self>> {
        let handle = Handle::load(id, false, options)?;
        Ok(handle.map(|handle| Self { handle }))
    }

    pub fn ratchet_encrypt(&mut self, plaintext: &[u8], ad: &[u8]) -> SessionResult<Message> {
        let (state, message) = DoubleRatchet::encrypt(
            self.handle.state().clone(),
            plaintext,
            ad,
            self.handle.crypto(),
        )?;
        self.handle.encrypted(state)?;
        Ok(message)
    }

    pub fn ratchet_decrypt(&mut self, message: &Message, ad: &[u8]) -> SessionResult<Vec<u8>> {
        let (state, plaintext, update) = DoubleRatchet::decrypt(
            self.handle.state().clone(),
            message,
            ad,
            self.handle.config(),
            self.handle.crypto(),
            self.handle.keys_storage(),
        )
        .map_err(|err| self.handle.rejected(err))?;
        self.handle.decrypted(state, update)?;
        Ok(plaintext)
    }

    pub fn id(&self) -> &[u8] {
        self.handle.id()
    }

    pub fn state(&self) -> &RatchetState {
        self.handle.state()
    }

    pub fn config(&self) -> &Config {
        self.handle.config()
    }

    pub fn keys_storage(&self) -> &K {
        self.handle.keys_storage()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Ratchet(#[from] RatchetError),

    #[error(transparent)]
    KeysStorage(#[from] KeysStorageError),

    #[error(transparent)]
    SessionStorage(#[from] SessionStorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::{ConfigError, Options};
    use crate::crypto::Provider;
    use crate::key::Key;
    use crate::storage::{MemoryKeysStorage, MemorySessionStorage};
    use crate::traits::Crypto;

    use super::{Session, SessionError};

    #[test]
    fn load_requires_session_storage() {
        assert!(matches!(
            Session::load(b"alice", Options::default()),
            Err(SessionError::Config(ConfigError::MissingSessionStorage))
        ));
    }

    #[test]
    fn persisted_on_creation() {
        let crypto = Arc::new(Provider::from_seed([1; 32]));
        let session_storage = Arc::new(MemorySessionStorage::default());
        let options = Options::default()
            .with_crypto(crypto.clone())
            .with_keys_storage(Arc::new(MemoryKeysStorage::default()))
            .with_session_storage(session_storage);

        assert!(Session::load(b"bob", options.clone()).unwrap().is_none());

        let bob_pair = crypto.generate_dh().unwrap();
        let bob = Session::new(
            b"bob",
            Key::from_bytes([1; 32]),
            bob_pair,
            options.clone(),
        )
        .unwrap();

        let loaded = Session::load(b"bob", options).unwrap().unwrap();
        assert_eq!(loaded.state(), bob.state());
        assert_eq!(loaded.id(), b"bob");
    }
}

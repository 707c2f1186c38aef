// SPDX-License-Identifier: MIT OR Apache-2.0

//! Double Ratchet session with header encryption.
use crate::config::{Config, Options};
use crate::crypto::Provider;
use crate::crypto::x25519::{DhPair, PublicKey};
use crate::header::MessageHe;
use crate::key::Key;
use crate::ratchet::{DoubleRatchet, RatchetState};
use crate::session::{Handle, SessionResult};
use crate::storage::MemoryKeysStorage;
use crate::traits::{Crypto, KeysStorage};

/// Double Ratchet session encrypting message headers.
///
/// Next to the shared key both parties agree on two initial header keys: `shared_hka` is used by
/// the initiating party to encrypt its first headers, `shared_nhkb` by the responding party.
///
/// Skipped message keys are indexed by the header key of their chain. Looking them up requires
/// trying to decrypt the header with every stored header key, see
/// [`KeysStorage::all`](crate::traits::KeysStorage::all).
#[derive(Debug)]
pub struct SessionHe<C = Provider, K = MemoryKeysStorage> {
    handle: Handle<C, K>,
}

impl<C, K> SessionHe<C, K>
where
    C: Crypto,
    K: KeysStorage,
{
    /// Creates a session with our initial ratchet key pair, the other party is expected to send
    /// the first message.
    pub fn new(
        id: &[u8],
        shared_key: Key,
        shared_hka: Key,
        shared_nhkb: Key,
        our_pair: DhPair,
        options: Options<C, K>,
    ) -> SessionResult<Self> {
        let state = DoubleRatchet::init_he(shared_key, shared_hka, shared_nhkb, our_pair);
        Ok(Self {
            handle: Handle::new(id, state, options)?,
        })
    }

    /// Creates a session knowing the other party's initial ratchet public key. We can send right
    /// away.
    pub fn new_with_remote_key(
        id: &[u8],
        shared_key: Key,
        shared_hka: Key,
        shared_nhkb: Key,
        their_public_key: PublicKey,
        options: Options<C, K>,
    ) -> SessionResult<Self> {
        let state = DoubleRatchet::init_he_with_remote_key(
            shared_key,
            shared_hka,
            shared_nhkb,
            their_public_key,
            &*options.crypto,
        )?;
        Ok(Self {
            handle: Handle::new(id, state, options)?,
        })
    }

    /// Restores a header-encrypted session from the configured session storage.
    pub fn load(id: &[u8], options: Options<C, K>) -> SessionResult<Option<Self>> {
        let handle = Handle::load(id, true, options)?;
        Ok(handle.map(|handle| Self { handle }))
    }

    pub fn ratchet_encrypt(&mut self, plaintext: &[u8], ad: &[u8]) -> SessionResult<MessageHe> {
        let (state, message) = DoubleRatchet::encrypt_he(
            self.handle.state().clone(),
            plaintext,
            ad,
            self.handle.crypto(),
        )?;
        self.handle.encrypted(state)?;
        Ok(message)
    }

    pub fn ratchet_decrypt(&mut self, message: &MessageHe, ad: &[u8]) -> SessionResult<Vec<u8>> {
        let (state, plaintext, update) = DoubleRatchet::decrypt_he(
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::{ConfigError, Options};
    use crate::crypto::Provider;
    use crate::key::Key;
    use crate::session::{Session, SessionError};
    use crate::storage::{MemoryKeysStorage, MemorySessionStorage};
    use crate::traits::Crypto;

    use super::SessionHe;

    #[test]
    fn session_kind_mismatch() {
        let crypto = Arc::new(Provider::from_seed([1; 32]));
        let options = Options::default()
            .with_crypto(crypto.clone())
            .with_keys_storage(Arc::new(MemoryKeysStorage::default()))
            .with_session_storage(Arc::new(MemorySessionStorage::default()));

        let bob_pair = crypto.generate_dh().unwrap();
        SessionHe::new(
            b"bob",
            Key::from_bytes([1; 32]),
            Key::from_bytes([2; 32]),
            Key::from_bytes([3; 32]),
            bob_pair,
            options.clone(),
        )
        .unwrap();

        assert!(SessionHe::load(b"bob", options.clone()).unwrap().is_some());
        assert!(matches!(
            Session::load(b"bob", options),
            Err(SessionError::Config(ConfigError::SessionKindMismatch(_)))
        ));
    }
}

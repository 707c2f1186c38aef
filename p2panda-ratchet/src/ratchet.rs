// SPDX-License-Identifier: MIT OR Apache-2.0

//! Double Ratchet state machine.
//!
//! All transitions are pure functions taking the current [`RatchetState`] and returning the next
//! one. Reads from the skipped-keys storage happen during a transition, but writes are only
//! described by the returned [`KeysUpdate`] and left to the caller. This allows the session
//! handles to persist everything before the new state becomes visible; a failed transition never
//! leaves a half-updated state behind.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::{KdfChain, RootChain};
use crate::config::Config;
use crate::crypto::CryptoError;
use crate::crypto::x25519::{DhPair, PublicKey};
use crate::header::{HeaderError, Message, MessageHeader};
use crate::key::Key;
use crate::traits::{Crypto, KeysStorage, KeysStorageError};

pub type RatchetResult<T> = Result<T, RatchetError>;

/// Double Ratchet combining a Diffie-Hellman ratchet with symmetric sending and receiving chains.
///
/// ```text
///            root chain
///                │
///   DH(A0, B0) ──┼──► receiving chain (Bob) / sending chain (Alice)
///                │
///   DH(A0, B1) ──┼──► sending chain (Bob) / receiving chain (Alice)
///                │
///   DH(A1, B1) ──┼──► ..
///                ▼
/// ```
///
/// Every message is encrypted with a fresh message key from the sending chain. As soon as a
/// message with a new ratchet public key arrives, both parties perform a DH ratchet step, which
/// replaces both chains with new ones derived from the root chain.
///
/// Messages which arrive out-of-order or get lost leave "skipped" message keys behind. They are
/// handed to the caller in a [`KeysUpdate`] to be stored until the message eventually arrives.
pub struct DoubleRatchet;

/// Mutable record of a Double Ratchet session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetState {
    /// Our current ratchet key pair.
    pub(crate) dhs: DhPair,

    /// Their last known ratchet public key.
    pub(crate) dhr: Option<PublicKey>,

    pub(crate) root_ch: RootChain,

    /// Only known after the first DH ratchet step when we didn't know their public key yet.
    pub(crate) send_ch: Option<KdfChain>,

    /// Only known after we've received the first message.
    pub(crate) recv_ch: Option<KdfChain>,

    /// Number of messages in our previous sending chain.
    pub(crate) pn: u32,

    pub(crate) header_encryption: bool,
    pub(crate) hks: Option<Key>,
    pub(crate) nhks: Option<Key>,
    pub(crate) hkr: Option<Key>,
    pub(crate) nhkr: Option<Key>,

    /// Number of DH ratchet steps performed so far.
    pub(crate) step: u64,

    /// Sequence number of the next skipped message key.
    pub(crate) keys_count: u64,

    /// Ratchet step mapped to the sequence number in the moment the receiving chain before that
    /// step got replaced. All skipped keys of older chains have a lower sequence number.
    pub(crate) retired_epochs: BTreeMap<u64, u64>,
}

impl RatchetState {
    /// Our current ratchet public key.
    pub fn public_key(&self) -> &PublicKey {
        self.dhs.public_key()
    }

    /// Their last known ratchet public key.
    pub fn their_public_key(&self) -> Option<&PublicKey> {
        self.dhr.as_ref()
    }

    /// Number of messages sent in the current sending chain.
    pub fn sending_n(&self) -> Option<u32> {
        self.send_ch.as_ref().map(|chain| chain.n())
    }

    /// Number of messages received in the current receiving chain.
    pub fn receiving_n(&self) -> Option<u32> {
        self.recv_ch.as_ref().map(|chain| chain.n())
    }

    pub fn previous_n(&self) -> u32 {
        self.pn
    }

    pub fn is_header_encrypted(&self) -> bool {
        self.header_encryption
    }

    /// Number of DH ratchet steps performed so far.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Index key for skipped message keys of the current receiving chain.
    pub(crate) fn receiving_index_key(&self) -> Option<Key> {
        if self.header_encryption {
            self.hkr.clone()
        } else {
            self.dhr.as_ref().map(Key::from)
        }
    }
}

/// Message key which was skipped during decryption and needs to be stored.
#[derive(Clone, Debug)]
pub struct SkippedKey {
    pub index_key: Key,
    pub message_number: u32,
    pub message_key: Key,
    pub sequence_number: u64,
}

/// Changes to the skipped-keys storage resulting from a decryption.
///
/// Skipped keys need to be inserted before the new ratchet state is committed, deletions only
/// afterwards. Otherwise a failed commit could lose keys of messages which didn't arrive yet.
#[derive(Debug, Default)]
pub struct KeysUpdate {
    /// Message keys to insert.
    pub skipped: Vec<SkippedKey>,

    /// Stored message key which was used for this message and needs to be removed.
    pub consumed: Option<(Key, u32)>,

    /// Remove all keys of this session with a sequence number lower or equal to this value.
    pub delete_until: Option<u64>,

    /// Enforce the upper bound of stored keys for this session.
    pub truncate: bool,
}

impl KeysUpdate {
    pub(crate) fn consumed(index_key: Key, message_number: u32) -> Self {
        Self {
            consumed: Some((index_key, message_number)),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.skipped.is_empty()
            && self.consumed.is_none()
            && self.delete_until.is_none()
            && !self.truncate
    }
}

impl DoubleRatchet {
    /// Initialises the ratchet of the party which doesn't know the other's ratchet public key yet.
    ///
    /// We can't send messages before we've received a first one.
    pub fn init(shared_key: Key, our_pair: DhPair) -> RatchetState {
        RatchetState {
            dhs: our_pair,
            dhr: None,
            root_ch: RootChain::new(shared_key),
            send_ch: None,
            recv_ch: None,
            pn: 0,
            header_encryption: false,
            hks: None,
            nhks: None,
            hkr: None,
            nhkr: None,
            step: 0,
            keys_count: 0,
            retired_epochs: BTreeMap::new(),
        }
    }

    /// Initialises the ratchet of the party which knows the other's ratchet public key already.
    ///
    /// A new key pair is generated and the sending chain derived right away.
    pub fn init_with_remote_key<C: Crypto>(
        shared_key: Key,
        their_public_key: PublicKey,
        crypto: &C,
    ) -> RatchetResult<RatchetState> {
        let dhs = crypto.generate_dh()?;
        let dh_output = crypto.dh(&dhs, &their_public_key)?;
        let (root_ch, send_ch, _) = RootChain::new(shared_key).step(&dh_output, crypto)?;

        Ok(RatchetState {
            dhs,
            dhr: Some(their_public_key),
            root_ch,
            send_ch: Some(send_ch),
            recv_ch: None,
            pn: 0,
            header_encryption: false,
            hks: None,
            nhks: None,
            hkr: None,
            nhkr: None,
            step: 0,
            keys_count: 0,
            retired_epochs: BTreeMap::new(),
        })
    }

    /// Encrypts a message with the next key of our sending chain.
    ///
    /// The encoded header is authenticated together with the given associated data.
    pub fn encrypt<C: Crypto>(
        y: RatchetState,
        plaintext: &[u8],
        ad: &[u8],
        crypto: &C,
    ) -> RatchetResult<(RatchetState, Message)> {
        let mut y_i = y;
        let send_ch = y_i
            .send_ch
            .take()
            .ok_or(RatchetError::SendingChainNotReady)?;

        let header = MessageHeader::new(*y_i.dhs.public_key(), send_ch.n(), y_i.pn);
        let (send_ch, message_key) = send_ch.step(crypto)?;
        let ciphertext = crypto.encrypt(
            &message_key,
            plaintext,
            &associated_data(ad, &header.encode()),
        )?;
        y_i.send_ch = Some(send_ch);

        Ok((y_i, Message { header, ciphertext }))
    }

    /// Decrypts a message, performing a DH ratchet step if it carries a new ratchet public key.
    pub fn decrypt<C: Crypto, K: KeysStorage>(
        y: RatchetState,
        message: &Message,
        ad: &[u8],
        config: &Config,
        crypto: &C,
        storage: &K,
    ) -> RatchetResult<(RatchetState, Vec<u8>, KeysUpdate)> {
        let header = &message.header;
        let aad = associated_data(ad, &header.encode());

        // Message was skipped before, use the stored key.
        let index_key = Key::from(&header.dh);
        if let Some(message_key) = storage.get(&index_key, header.n)? {
            let plaintext = crypto
                .decrypt(&message_key, &message.ciphertext, &aad)
                .map_err(RatchetError::Decrypt)?;
            return Ok((y, plaintext, KeysUpdate::consumed(index_key, header.n)));
        }

        let mut update = KeysUpdate::default();
        let mut y_i = y;

        if y_i.dhr != Some(header.dh) {
            if let Some(old_index_key) = y_i.receiving_index_key() {
                y_i = Self::skip_message_keys(
                    y_i,
                    header.pn,
                    &old_index_key,
                    config,
                    crypto,
                    storage,
                    &mut update,
                )?;
            }
            y_i = Self::dh_ratchet(y_i, header.dh, crypto)?;
            update.delete_until = Self::retire_epochs(&mut y_i, config);
            update.truncate = true;
        }

        y_i = Self::skip_message_keys(
            y_i,
            header.n,
            &index_key,
            config,
            crypto,
            storage,
            &mut update,
        )?;

        let (y_i, plaintext) = Self::decrypt_inner(y_i, &message.ciphertext, &aad, crypto)?;
        update.truncate |= !update.skipped.is_empty();

        Ok((y_i, plaintext, update))
    }

    /// Steps the receiving chain once and decrypts the ciphertext with the resulting key.
    pub(crate) fn decrypt_inner<C: Crypto>(
        y: RatchetState,
        ciphertext: &[u8],
        aad: &[u8],
        crypto: &C,
    ) -> RatchetResult<(RatchetState, Vec<u8>)> {
        let mut y_i = y;
        let recv_ch = y_i
            .recv_ch
            .take()
            .ok_or(RatchetError::ReceivingChainNotReady)?;
        let (recv_ch, message_key) = recv_ch.step(crypto)?;
        let plaintext = crypto
            .decrypt(&message_key, ciphertext, aad)
            .map_err(RatchetError::Decrypt)?;
        y_i.recv_ch = Some(recv_ch);
        Ok((y_i, plaintext))
    }

    /// Moves the receiving chain forward until message number `until`, collecting all keys on the
    /// way.
    ///
    /// Chains which do not exist yet are left untouched.
    pub(crate) fn skip_message_keys<C: Crypto, K: KeysStorage>(
        y: RatchetState,
        until: u32,
        index_key: &Key,
        config: &Config,
        crypto: &C,
        storage: &K,
        update: &mut KeysUpdate,
    ) -> RatchetResult<RatchetState> {
        let mut y_i = y;
        let Some(mut recv_ch) = y_i.recv_ch.take() else {
            return Ok(y_i);
        };

        if until < recv_ch.n() {
            return Err(RatchetError::StaleMessage {
                until,
                current: recv_ch.n(),
            });
        }

        let skip = (until - recv_ch.n()) as usize;
        let stored = storage.count(index_key)?;
        if skip + stored > config.max_skip as usize {
            return Err(RatchetError::TooManySkipped {
                skip,
                stored,
                max_skip: config.max_skip,
            });
        }

        while recv_ch.n() < until {
            let message_number = recv_ch.n();
            let (next_ch, message_key) = recv_ch.step(crypto)?;
            update.skipped.push(SkippedKey {
                index_key: index_key.clone(),
                message_number,
                message_key,
                sequence_number: y_i.keys_count,
            });
            y_i.keys_count += 1;
            recv_ch = next_ch;
        }

        y_i.recv_ch = Some(recv_ch);
        Ok(y_i)
    }

    /// Replaces both chains after learning a new ratchet public key of the other party.
    pub(crate) fn dh_ratchet<C: Crypto>(
        y: RatchetState,
        their_public_key: PublicKey,
        crypto: &C,
    ) -> RatchetResult<RatchetState> {
        let mut y_i = y;

        y_i.pn = y_i.sending_n().unwrap_or(0);
        y_i.dhr = Some(their_public_key);

        if y_i.header_encryption {
            y_i.hks = y_i.nhks.take();
            y_i.hkr = y_i.nhkr.take();
        }

        let dh_output = crypto.dh(&y_i.dhs, &their_public_key)?;
        let (root_ch, recv_ch, nhkr) = y_i.root_ch.step(&dh_output, crypto)?;

        let dhs = crypto.generate_dh()?;
        let dh_output = crypto.dh(&dhs, &their_public_key)?;
        let (root_ch, send_ch, nhks) = root_ch.step(&dh_output, crypto)?;

        y_i.dhs = dhs;
        y_i.root_ch = root_ch;
        y_i.recv_ch = Some(recv_ch);
        y_i.send_ch = Some(send_ch);

        if y_i.header_encryption {
            y_i.nhkr = Some(nhkr);
            y_i.nhks = Some(nhks);
        }

        y_i.step += 1;
        y_i.retired_epochs.insert(y_i.step, y_i.keys_count);

        Ok(y_i)
    }

    /// Forgets all epochs which are older than `max_keep` ratchet steps and returns the sequence
    /// number until which skipped keys of this session can be deleted.
    pub(crate) fn retire_epochs(y: &mut RatchetState, config: &Config) -> Option<u64> {
        let threshold = y.step.checked_sub(config.max_keep as u64)?;
        let kept = y.retired_epochs.split_off(&(threshold + 1));
        let retired = std::mem::replace(&mut y.retired_epochs, kept);
        retired
            .into_values()
            .max()
            .and_then(|sequence_number| sequence_number.checked_sub(1))
    }
}

pub(crate) fn associated_data(ad: &[u8], header: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(ad.len() + header.len());
    aad.extend_from_slice(ad);
    aad.extend_from_slice(header);
    aad
}

#[derive(Debug, Error)]
pub enum RatchetError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("could not decrypt message: {0}")]
    Decrypt(CryptoError),

    #[error("invalid header: could not decrypt with current or next header key")]
    InvalidHeader,

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(
        "bad until {until} (current {current}): probably an out-of-order message that was deleted"
    )]
    StaleMessage { until: u32, current: u32 },

    #[error("too many messages skipped: {skip} new and {stored} stored keys exceed {max_skip}")]
    TooManySkipped {
        skip: usize,
        stored: usize,
        max_skip: u32,
    },

    #[error("sending chain is not initialised yet, wait for the first message")]
    SendingChainNotReady,

    #[error("receiving chain is not initialised yet")]
    ReceivingChainNotReady,

    #[error("chain reached maximum number of messages")]
    ChainExhausted,

    #[error(transparent)]
    KeysStorage(#[from] KeysStorageError),
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::crypto::Provider;
    use crate::key::Key;
    use crate::storage::MemoryKeysStorage;
    use crate::traits::{Crypto, KeysStorage};

    use super::{DoubleRatchet, RatchetError, RatchetState};

    fn init(crypto: &Provider) -> (RatchetState, RatchetState) {
        let shared_key = Key::from_bytes([1; 32]);
        let bob_pair = crypto.generate_dh().unwrap();
        let alice = DoubleRatchet::init_with_remote_key(
            shared_key.clone(),
            *bob_pair.public_key(),
            crypto,
        )
        .unwrap();
        let bob = DoubleRatchet::init(shared_key, bob_pair);
        (alice, bob)
    }

    #[test]
    fn encrypt_decrypt() {
        let crypto = Provider::from_seed([1; 32]);
        let storage = MemoryKeysStorage::default();
        let config = Config::default();
        let (alice, bob) = init(&crypto);

        let (alice, message_1) = DoubleRatchet::encrypt(alice, b"Dum", b"ad", &crypto).unwrap();
        let (_alice, message_2) = DoubleRatchet::encrypt(alice, b"Di", b"ad", &crypto).unwrap();
        assert_eq!(message_1.header.n, 0);
        assert_eq!(message_2.header.n, 1);

        let (bob, receive_1, update) =
            DoubleRatchet::decrypt(bob, &message_1, b"ad", &config, &crypto, &storage).unwrap();
        assert_eq!(receive_1, b"Dum");
        assert_eq!(bob.step(), 1);
        assert_eq!(bob.receiving_n(), Some(1));
        assert!(update.skipped.is_empty());

        let (bob, receive_2, update) =
            DoubleRatchet::decrypt(bob, &message_2, b"ad", &config, &crypto, &storage).unwrap();
        assert_eq!(receive_2, b"Di");
        assert_eq!(bob.step(), 1);
        assert_eq!(bob.receiving_n(), Some(2));
        assert!(update.is_empty());
    }

    #[test]
    fn skipped_keys() {
        let crypto = Provider::from_seed([1; 32]);
        let storage = MemoryKeysStorage::default();
        let config = Config::default();
        let (alice, bob) = init(&crypto);

        let (alice, _message_1) = DoubleRatchet::encrypt(alice, b"Dum", &[], &crypto).unwrap();
        let (alice, _message_2) = DoubleRatchet::encrypt(alice, b"Di", &[], &crypto).unwrap();
        let (_alice, message_3) = DoubleRatchet::encrypt(alice, b"Dum!", &[], &crypto).unwrap();

        let (bob, receive_3, update) =
            DoubleRatchet::decrypt(bob, &message_3, &[], &config, &crypto, &storage).unwrap();
        assert_eq!(receive_3, b"Dum!");
        assert_eq!(bob.receiving_n(), Some(3));

        // Keys for both missing messages are handed out for storage.
        assert_eq!(update.skipped.len(), 2);
        assert_eq!(update.skipped[0].message_number, 0);
        assert_eq!(update.skipped[0].sequence_number, 0);
        assert_eq!(update.skipped[1].message_number, 1);
        assert_eq!(update.skipped[1].sequence_number, 1);
        assert_eq!(update.skipped[0].index_key, Key::from(&message_3.header.dh));
        assert!(update.truncate);
    }

    #[test]
    fn stale_message() {
        let crypto = Provider::from_seed([1; 32]);
        let storage = MemoryKeysStorage::default();
        let config = Config::default();
        let (alice, bob) = init(&crypto);

        let (_alice, message_1) = DoubleRatchet::encrypt(alice, b"Dum", &[], &crypto).unwrap();
        let (bob, _, _) =
            DoubleRatchet::decrypt(bob, &message_1, &[], &config, &crypto, &storage).unwrap();

        // Replaying the same message fails as the key was used already.
        assert!(matches!(
            DoubleRatchet::decrypt(bob, &message_1, &[], &config, &crypto, &storage),
            Err(RatchetError::StaleMessage {
                until: 0,
                current: 1
            })
        ));
    }

    #[test]
    fn too_many_skipped() {
        let crypto = Provider::from_seed([1; 32]);
        let storage = MemoryKeysStorage::default();
        let config = Config {
            max_skip: 2,
            ..Default::default()
        };
        let (alice, bob) = init(&crypto);

        let mut alice = alice;
        let mut messages = Vec::new();
        for _ in 0..4 {
            let (alice_i, message) = DoubleRatchet::encrypt(alice, b"Dum", &[], &crypto).unwrap();
            alice = alice_i;
            messages.push(message);
        }

        // Skipping two messages is fine, three is not.
        assert!(
            DoubleRatchet::decrypt(bob.clone(), &messages[2], &[], &config, &crypto, &storage)
                .is_ok()
        );
        assert!(matches!(
            DoubleRatchet::decrypt(bob, &messages[3], &[], &config, &crypto, &storage),
            Err(RatchetError::TooManySkipped {
                skip: 3,
                stored: 0,
                max_skip: 2
            })
        ));
    }

    #[test]
    fn stored_keys_count_towards_limit() {
        let crypto = Provider::from_seed([1; 32]);
        let storage = MemoryKeysStorage::default();
        let config = Config {
            max_skip: 2,
            ..Default::default()
        };
        let (alice, bob) = init(&crypto);

        let mut alice = alice;
        let mut messages = Vec::new();
        for _ in 0..4 {
            let (alice_i, message) = DoubleRatchet::encrypt(alice, b"Dum", &[], &crypto).unwrap();
            alice = alice_i;
            messages.push(message);
        }

        let index_key = Key::from(&messages[0].header.dh);
        storage
            .put(b"other", &index_key, 100, &Key::from_bytes([2; 32]), 0)
            .unwrap();

        assert!(matches!(
            DoubleRatchet::decrypt(bob, &messages[2], &[], &config, &crypto, &storage),
            Err(RatchetError::TooManySkipped {
                skip: 2,
                stored: 1,
                max_skip: 2
            })
        ));
    }

    #[test]
    fn chains_not_ready() {
        let crypto = Provider::from_seed([1; 32]);
        let (alice, bob) = init(&crypto);

        // Bob doesn't know Alice's ratchet key yet.
        assert!(matches!(
            DoubleRatchet::encrypt(bob, b"Dum", &[], &crypto),
            Err(RatchetError::SendingChainNotReady)
        ));

        // Alice didn't receive anything yet.
        assert!(matches!(
            DoubleRatchet::decrypt_inner(alice, b"Dum", &[], &crypto),
            Err(RatchetError::ReceivingChainNotReady)
        ));
    }

    #[test]
    fn tampered_associated_data() {
        let crypto = Provider::from_seed([1; 32]);
        let storage = MemoryKeysStorage::default();
        let config = Config::default();
        let (alice, bob) = init(&crypto);

        let (_alice, message) = DoubleRatchet::encrypt(alice, b"Dum", b"ad", &crypto).unwrap();
        assert!(matches!(
            DoubleRatchet::decrypt(bob, &message, b"da", &config, &crypto, &storage),
            Err(RatchetError::Decrypt(_))
        ));
    }

    #[test]
    fn retire_epochs() {
        let crypto = Provider::from_seed([1; 32]);
        let config = Config {
            max_keep: 2,
            ..Default::default()
        };
        let (_alice, mut bob) = init(&crypto);

        // Bob performed four ratchet steps, the sequence numbers were 0, 3, 5 and 9 when the
        // previous receiving chains got replaced.
        bob.step = 4;
        bob.retired_epochs.insert(1, 0);
        bob.retired_epochs.insert(2, 3);
        bob.retired_epochs.insert(3, 5);
        bob.retired_epochs.insert(4, 9);

        // Epochs of step 1 and 2 are out of the window, everything below sequence number 3 goes.
        assert_eq!(DoubleRatchet::retire_epochs(&mut bob, &config), Some(2));
        assert_eq!(bob.retired_epochs.len(), 2);

        // Nothing to retire anymore.
        assert_eq!(DoubleRatchet::retire_epochs(&mut bob, &config), None);
        assert_eq!(bob.retired_epochs.len(), 2);
    }
}

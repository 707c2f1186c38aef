// SPDX-License-Identifier: MIT OR Apache-2.0

//! `p2panda-ratchet` implements the [Double Ratchet
//! algorithm](https://signal.org/docs/specifications/doubleratchet/) for end-to-end encrypted
//! sessions between two parties who agreed on a shared secret before.
//!
//! Every message is encrypted with a fresh key. Compromising a key does not reveal previously
//! sent messages (forward secrecy) and a new Diffie-Hellman ratchet step heals the session after a
//! compromise (post-compromise security). Messages can arrive out-of-order or get lost, the keys
//! of skipped messages are kept in a storage until the message eventually arrives.
//!
//! ## Sessions
//!
//! [`Session`] sends the header of each message (ratchet public key and message numbers) in
//! plain text, authenticated as associated data. [`SessionHe`] additionally encrypts the header
//! with rotating header keys, hiding the ratchet public keys and message numbers from observers.
//!
//! Both sessions are created in one of two modes:
//!
//! * `new`: we only have our own ratchet key pair and wait for the first message of the other
//!   party before we can send.
//! * `new_with_remote_key`: we know the other party's ratchet public key and can send right away.
//!
//! Sessions are single-writer: calls to `ratchet_encrypt` and `ratchet_decrypt` need to be
//! serialised per session. Independent sessions can run in parallel and share a storage.
//!
//! ## Storage
//!
//! Skipped message keys are kept in a [`KeysStorage`]. Sessions read from it while decrypting and
//! write to it before their new ratchet state becomes visible, so that a crash never loses a key
//! of a message the ratchet already moved past. [`MemoryKeysStorage`] can be shared between many
//! sessions.
//!
//! Keys of skipped messages are bounded in three ways, see [`Config`]:
//!
//! * No more than `max_skip` keys get derived and stored for a single chain.
//! * Keys of chains which are older than `max_keep` ratchet steps are deleted.
//! * No more than `max_message_keys_per_session` keys are kept for a session, the oldest go first.
//!
//! Optionally the ratchet state can be persisted in a [`SessionStorage`] after every change to
//! restore sessions later with `Session::load`.
//!
//! ## Atomic state changes
//!
//! All ratchet transitions are implemented as pure functions in [`DoubleRatchet`], returning the
//! next state instead of mutating it. Failed decryptions (corrupted, replayed or forged messages)
//! therefore leave the session exactly as it was before.
//!
//! ## Cryptography
//!
//! The [`Crypto`] trait describes all algorithms the ratchet needs and can be replaced when
//! creating a session. The default [`Provider`] uses X25519, XChaCha20-Poly1305 and HKDF with
//! SHA256.
mod cbor;
mod chain;
mod config;
pub mod crypto;
mod header;
mod key;
mod ratchet;
mod ratchet_he;
mod session;
mod session_he;
mod storage;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;

pub use cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
pub use chain::{KdfChain, RootChain};
pub use config::{
    Config, ConfigError, DEFAULT_MAX_KEEP, DEFAULT_MAX_MESSAGE_KEYS_PER_SESSION, DEFAULT_MAX_SKIP,
    Options, SharedSessionStorage,
};
pub use crypto::x25519::{DhPair, PublicKey, SecretKey};
pub use crypto::{CryptoError, Provider};
pub use header::{HEADER_SIZE, HeaderError, Message, MessageHe, MessageHeader};
pub use key::{KEY_SIZE, Key};
pub use ratchet::{
    DoubleRatchet, KeysUpdate, RatchetError, RatchetResult, RatchetState, SkippedKey,
};
pub use session::{Session, SessionError, SessionResult};
pub use session_he::SessionHe;
pub use storage::{MemoryKeysStorage, MemorySessionStorage};
pub use traits::{
    AllMessageKeys, Crypto, KeysStorage, KeysStorageError, SessionStorage, SessionStorageError,
};

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers to set up deterministic sessions in tests.
use std::sync::Arc;

use crate::config::Options;
use crate::crypto::Provider;
use crate::key::Key;
use crate::session::Session;
use crate::session_he::SessionHe;
use crate::storage::MemoryKeysStorage;
use crate::traits::Crypto;

pub type TestOptions = Options<Provider, MemoryKeysStorage>;

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Shared key `0x01..0x20`.
pub fn shared_key() -> Key {
    let mut bytes = [0u8; 32];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = i as u8 + 1;
    }
    Key::from_bytes(bytes)
}

/// Options with seeded randomness and their own skipped-keys storage.
pub fn test_options(seed: [u8; 32]) -> TestOptions {
    Options::new(
        Arc::new(Provider::from_seed(seed)),
        Arc::new(MemoryKeysStorage::default()),
    )
}

/// Alice knows Bob's ratchet public key and sends first.
pub fn init_sessions(
    alice_options: TestOptions,
    bob_options: TestOptions,
) -> (Session, Session) {
    let bob_pair = bob_options
        .crypto
        .generate_dh()
        .expect("generate key pair");

    let alice = Session::new_with_remote_key(
        b"alice",
        shared_key(),
        *bob_pair.public_key(),
        alice_options,
    )
    .expect("create alice session");
    let bob = Session::new(b"bob", shared_key(), bob_pair, bob_options).expect("create bob session");

    (alice, bob)
}

/// Alice knows Bob's ratchet public key and sends first, headers are encrypted.
pub fn init_sessions_he(
    alice_options: TestOptions,
    bob_options: TestOptions,
) -> (SessionHe, SessionHe) {
    let shared_hka = Key::from_bytes([0xa; 32]);
    let shared_nhkb = Key::from_bytes([0xb; 32]);
    let bob_pair = bob_options
        .crypto
        .generate_dh()
        .expect("generate key pair");

    let alice = SessionHe::new_with_remote_key(
        b"alice",
        shared_key(),
        shared_hka.clone(),
        shared_nhkb.clone(),
        *bob_pair.public_key(),
        alice_options,
    )
    .expect("create alice session");
    let bob = SessionHe::new(
        b"bob",
        shared_key(),
        shared_hka,
        shared_nhkb,
        bob_pair,
        bob_options,
    )
    .expect("create bob session");

    (alice, bob)
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Double Ratchet with header encryption.
//!
//! Headers get encrypted with header keys which rotate on every DH ratchet step. Observers can't
//! learn ratchet public keys or message numbers from the messages anymore. Receivers try to
//! decrypt a header with their current and next header key to find out if a message belongs to
//! the current epoch or starts a new one.
use std::collections::BTreeMap;

use crate::chain::RootChain;
use crate::config::Config;
use crate::crypto::x25519::{DhPair, PublicKey};
use crate::header::{MessageHe, MessageHeader};
use crate::key::Key;
use crate::ratchet::{
    DoubleRatchet, KeysUpdate, RatchetError, RatchetResult, RatchetState, associated_data,
};
use crate::traits::{Crypto, KeysStorage};

impl DoubleRatchet {
    /// Initialises the header-encrypted ratchet of the party which doesn't know the other's
    /// ratchet public key yet.
    ///
    /// Both header keys were agreed on together with the shared key. We expect the first message
    /// to be encrypted with `shared_hka` and use `shared_nhkb` for our own first message.
    pub fn init_he(
        shared_key: Key,
        shared_hka: Key,
        shared_nhkb: Key,
        our_pair: DhPair,
    ) -> RatchetState {
        RatchetState {
            dhs: our_pair,
            dhr: None,
            root_ch: RootChain::new(shared_key),
            send_ch: None,
            recv_ch: None,
            pn: 0,
            header_encryption: true,
            hks: None,
            nhks: Some(shared_nhkb),
            hkr: None,
            nhkr: Some(shared_hka),
            step: 0,
            keys_count: 0,
            retired_epochs: BTreeMap::new(),
        }
    }

    /// Initialises the header-encrypted ratchet of the party which knows the other's ratchet
    /// public key already.
    pub fn init_he_with_remote_key<C: Crypto>(
        shared_key: Key,
        shared_hka: Key,
        shared_nhkb: Key,
        their_public_key: PublicKey,
        crypto: &C,
    ) -> RatchetResult<RatchetState> {
        let dhs = crypto.generate_dh()?;
        let dh_output = crypto.dh(&dhs, &their_public_key)?;
        let (root_ch, send_ch, nhks) = RootChain::new(shared_key).step(&dh_output, crypto)?;

        Ok(RatchetState {
            dhs,
            dhr: Some(their_public_key),
            root_ch,
            send_ch: Some(send_ch),
            recv_ch: None,
            pn: 0,
            header_encryption: true,
            hks: Some(shared_hka),
            nhks: Some(nhks),
            hkr: None,
            nhkr: Some(shared_nhkb),
            step: 0,
            keys_count: 0,
            retired_epochs: BTreeMap::new(),
        })
    }

    /// Encrypts header and message with our current sending header and message key.
    ///
    /// The encrypted header is authenticated together with the given associated data.
    pub fn encrypt_he<C: Crypto>(
        y: RatchetState,
        plaintext: &[u8],
        ad: &[u8],
        crypto: &C,
    ) -> RatchetResult<(RatchetState, MessageHe)> {
        let mut y_i = y;
        let (Some(send_ch), Some(hks)) = (y_i.send_ch.take(), y_i.hks.as_ref()) else {
            return Err(RatchetError::SendingChainNotReady);
        };

        let header = MessageHeader::new(*y_i.dhs.public_key(), send_ch.n(), y_i.pn);
        let encrypted_header = crypto.encrypt(hks, &header.encode(), &[])?;

        let (send_ch, message_key) = send_ch.step(crypto)?;
        let ciphertext = crypto.encrypt(
            &message_key,
            plaintext,
            &associated_data(ad, &encrypted_header),
        )?;
        y_i.send_ch = Some(send_ch);

        Ok((
            y_i,
            MessageHe {
                header: encrypted_header,
                ciphertext,
            },
        ))
    }

    /// Decrypts a header-encrypted message, performing a DH ratchet step if the header was
    /// encrypted with the next header key.
    pub fn decrypt_he<C: Crypto, K: KeysStorage>(
        y: RatchetState,
        message: &MessageHe,
        ad: &[u8],
        config: &Config,
        crypto: &C,
        storage: &K,
    ) -> RatchetResult<(RatchetState, Vec<u8>, KeysUpdate)> {
        let aad = associated_data(ad, &message.header);

        if let Some((plaintext, update)) =
            Self::try_skipped_message_keys(message, &aad, crypto, storage)?
        {
            return Ok((y, plaintext, update));
        }

        let (header, step) = Self::decrypt_header(&y, &message.header, crypto)?;

        let mut update = KeysUpdate::default();
        let mut y_i = y;

        if step {
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

        let index_key = y_i
            .receiving_index_key()
            .ok_or(RatchetError::ReceivingChainNotReady)?;
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

    /// Looks for a stored message key by trying to decrypt the header with every stored header
    /// key.
    fn try_skipped_message_keys<C: Crypto, K: KeysStorage>(
        message: &MessageHe,
        aad: &[u8],
        crypto: &C,
        storage: &K,
    ) -> RatchetResult<Option<(Vec<u8>, KeysUpdate)>> {
        for (header_key, message_keys) in storage.all()? {
            let Ok(header_bytes) = crypto.decrypt(&header_key, &message.header, &[]) else {
                continue;
            };
            let header = MessageHeader::decode(&header_bytes)?;

            // Only one header key can decrypt the header.
            let Some(message_key) = message_keys.get(&header.n) else {
                return Ok(None);
            };
            let plaintext = crypto
                .decrypt(message_key, &message.ciphertext, aad)
                .map_err(RatchetError::Decrypt)?;
            return Ok(Some((
                plaintext,
                KeysUpdate::consumed(header_key, header.n),
            )));
        }

        Ok(None)
    }

    /// Decrypts the header with our current or next receiving header key.
    ///
    /// Returns `true` if the next header key was used, which means that the message starts a new
    /// ratchet epoch. Both keys are always tried.
    pub(crate) fn decrypt_header<C: Crypto>(
        y: &RatchetState,
        encrypted_header: &[u8],
        crypto: &C,
    ) -> RatchetResult<(MessageHeader, bool)> {
        let current = y
            .hkr
            .as_ref()
            .and_then(|hkr| crypto.decrypt(hkr, encrypted_header, &[]).ok());
        let next = y
            .nhkr
            .as_ref()
            .and_then(|nhkr| crypto.decrypt(nhkr, encrypted_header, &[]).ok());

        // Authenticated headers always have the right length, malformed ones count as failed
        // attempts.
        let decode = |bytes: Option<Vec<u8>>| {
            bytes.and_then(|bytes| MessageHeader::decode(&bytes).ok())
        };

        if let Some(header) = decode(current) {
            return Ok((header, false));
        }
        if let Some(header) = decode(next) {
            return Ok((header, true));
        }
        Err(RatchetError::InvalidHeader)
    }
}

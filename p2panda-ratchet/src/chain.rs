// SPDX-License-Identifier: MIT OR Apache-2.0

//! Symmetric-key ratchets ("KDF chains") for messages and the root of the Double Ratchet.
use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::ratchet::{RatchetError, RatchetResult};
use crate::traits::Crypto;

/// Sending or receiving chain, producing one message key per step.
///
/// ```text
/// chain key 0 ──► chain key 1 ──► chain key 2 ──► ..
///      │               │               │
///      ▼               ▼               ▼
/// message key 0   message key 1   message key 2
/// ```
///
/// The chain only moves forwards, the counter `n` equals the number of message keys derived so
/// far. A chain is never reset, it gets replaced by a new one after a root chain step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfChain {
    chain_key: Key,
    n: u32,
}

impl KdfChain {
    pub fn new(chain_key: Key) -> Self {
        Self { chain_key, n: 0 }
    }

    /// Number of message keys derived from this chain.
    pub fn n(&self) -> u32 {
        self.n
    }

    /// Consumes the current chain key and returns the moved chain together with the message key
    /// for message number `n`.
    pub fn step<C: Crypto>(self, crypto: &C) -> RatchetResult<(Self, Key)> {
        let n = self.n.checked_add(1).ok_or(RatchetError::ChainExhausted)?;
        let (chain_key, message_key) = crypto.kdf_ck(&self.chain_key)?;
        Ok((Self { chain_key, n }, message_key))
    }
}

/// Root chain, combining its key with new Diffie-Hellman outputs to derive new sending and
/// receiving chains.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootChain {
    root_key: Key,
}

impl RootChain {
    pub fn new(root_key: Key) -> Self {
        Self { root_key }
    }

    /// Returns the moved root chain, a new message chain and a new header key.
    ///
    /// The header key is only used in sessions with header encryption.
    pub fn step<C: Crypto>(
        self,
        dh_output: &Key,
        crypto: &C,
    ) -> RatchetResult<(Self, KdfChain, Key)> {
        let (root_key, chain_key, header_key) = crypto.kdf_rk(&self.root_key, dh_output)?;
        Ok((Self { root_key }, KdfChain::new(chain_key), header_key))
    }
}

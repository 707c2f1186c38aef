// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic primitives and the default [`Crypto`](crate::traits::Crypto) provider.
pub mod hkdf;
mod provider;
pub mod x25519;
pub mod xchacha20;

pub use provider::{CryptoError, Provider, RngError};

// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory implementations of the storage interfaces.
mod keys;
mod session;

pub use keys::MemoryKeysStorage;
pub use session::MemorySessionStorage;

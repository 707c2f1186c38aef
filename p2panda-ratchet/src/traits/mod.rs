// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces for the capabilities a session depends on.
mod crypto;
mod keys_storage;
mod session_storage;

pub use crypto::Crypto;
pub use keys_storage::{AllMessageKeys, KeysStorage, KeysStorageError};
pub use session_storage::{SessionStorage, SessionStorageError};

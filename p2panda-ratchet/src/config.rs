// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration of ratchet sessions.
//!
//! `Config` holds the limits for skipped message keys and can be embedded in the configuration
//! files of applications. `Options` additionally carries the capabilities a session depends on and
//! is passed into the session constructors.
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Provider;
use crate::storage::MemoryKeysStorage;
use crate::traits::{Crypto, KeysStorage, SessionStorage};

/// Default maximum number of message keys which can be skipped in a single chain.
pub const DEFAULT_MAX_SKIP: u32 = 1000;

/// Default number of ratchet steps after which skipped keys of older chains are deleted.
pub const DEFAULT_MAX_KEEP: u32 = 100;

/// Default maximum number of skipped message keys stored per session.
pub const DEFAULT_MAX_MESSAGE_KEYS_PER_SESSION: usize = 2000;

/// Limits for skipped message keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of message keys to skip in a single chain, including keys which are stored
    /// already for it.
    pub max_skip: u32,

    /// Number of DH ratchet steps to keep skipped message keys of a chain for.
    pub max_keep: u32,

    /// Maximum number of skipped message keys stored for a session. The oldest keys are deleted
    /// first.
    pub max_message_keys_per_session: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_skip: DEFAULT_MAX_SKIP,
            max_keep: DEFAULT_MAX_KEEP,
            max_message_keys_per_session: DEFAULT_MAX_MESSAGE_KEYS_PER_SESSION,
        }
    }
}

/// Session storage shared between sessions.
pub type SharedSessionStorage = Arc<dyn SessionStorage + Send + Sync>;

/// Configuration and capabilities of a session.
///
/// ```
/// use std::sync::Arc;
///
/// use p2panda_ratchet::{MemoryKeysStorage, Options};
///
/// let keys_storage = Arc::new(MemoryKeysStorage::default());
/// let options = Options::default()
///     .with_max_skip(100)
///     .with_keys_storage(keys_storage);
/// ```
pub struct Options<C = Provider, K = MemoryKeysStorage> {
    pub(crate) config: Config,
    pub(crate) crypto: Arc<C>,
    pub(crate) keys_storage: Arc<K>,
    pub(crate) session_storage: Option<SharedSessionStorage>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config: Config::default(),
            crypto: Arc::new(Provider::default()),
            keys_storage: Arc::new(MemoryKeysStorage::default()),
            session_storage: None,
        }
    }
}

impl<C, K> Options<C, K>
where
    C: Crypto,
    K: KeysStorage,
{
    pub fn new(crypto: Arc<C>, keys_storage: Arc<K>) -> Self {
        Self {
            config: Config::default(),
            crypto,
            keys_storage,
            session_storage: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_skip(mut self, max_skip: u32) -> Self {
        self.config.max_skip = max_skip;
        self
    }

    pub fn with_max_keep(mut self, max_keep: u32) -> Self {
        self.config.max_keep = max_keep;
        self
    }

    pub fn with_max_message_keys_per_session(mut self, max_keys: usize) -> Self {
        self.config.max_message_keys_per_session = max_keys;
        self
    }

    /// Replaces the default crypto provider.
    pub fn with_crypto<C2: Crypto>(self, crypto: Arc<C2>) -> Options<C2, K> {
        Options {
            config: self.config,
            crypto,
            keys_storage: self.keys_storage,
            session_storage: self.session_storage,
        }
    }

    /// Replaces the default in-memory storage for skipped message keys.
    ///
    /// Pass the same storage to every session which should share it.
    pub fn with_keys_storage<K2: KeysStorage>(self, keys_storage: Arc<K2>) -> Options<C, K2> {
        Options {
            config: self.config,
            crypto: self.crypto,
            keys_storage,
            session_storage: self.session_storage,
        }
    }

    /// Persists the ratchet state after every change and allows loading sessions.
    pub fn with_session_storage(mut self, session_storage: SharedSessionStorage) -> Self {
        self.session_storage = Some(session_storage);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl<C, K> Clone for Options<C, K> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            crypto: self.crypto.clone(),
            keys_storage: self.keys_storage.clone(),
            session_storage: self.session_storage.clone(),
        }
    }
}

impl<C, K> fmt::Debug for Options<C, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("config", &self.config)
            .field("session_storage", &self.session_storage.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("loading a session requires a session storage")]
    MissingSessionStorage,

    #[error("persisted session {0} has a different header encryption mode")]
    SessionKindMismatch(String),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::crypto::Provider;
    use crate::storage::MemoryKeysStorage;

    use super::{Config, DEFAULT_MAX_KEEP, DEFAULT_MAX_SKIP, Options};

    #[test]
    fn builder() {
        let options = Options::default()
            .with_max_skip(5)
            .with_max_keep(2)
            .with_max_message_keys_per_session(10)
            .with_crypto(Arc::new(Provider::from_seed([1; 32])))
            .with_keys_storage(Arc::new(MemoryKeysStorage::default()));

        assert_eq!(
            options.config(),
            &Config {
                max_skip: 5,
                max_keep: 2,
                max_message_keys_per_session: 10,
            }
        );
        assert!(options.session_storage.is_none());
    }

    #[test]
    fn shared_keys_storage() {
        let keys_storage = Arc::new(MemoryKeysStorage::default());
        let options = Options::default().with_keys_storage(keys_storage.clone());
        let cloned = options.clone();

        assert!(Arc::ptr_eq(&options.keys_storage, &keys_storage));
        assert!(Arc::ptr_eq(&cloned.keys_storage, &keys_storage));
    }

    #[test]
    fn partial_config_file() {
        // Missing values fall back to defaults.
        let config = config_from_cbor("max_skip", 10);
        assert_eq!(config.max_skip, 10);
        assert_eq!(config.max_keep, DEFAULT_MAX_KEEP);
        assert_ne!(config.max_skip, DEFAULT_MAX_SKIP);
    }

    fn config_from_cbor(field: &str, value: u32) -> Config {
        use std::collections::BTreeMap;

        let map = BTreeMap::from([(field.to_string(), value)]);
        let bytes = crate::cbor::encode_cbor(&map).unwrap();
        crate::cbor::decode_cbor(&bytes).unwrap()
    }
}

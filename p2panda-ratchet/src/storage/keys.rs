// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::RwLock;

use crate::key::Key;
use crate::traits::{AllMessageKeys, KeysStorage, KeysStorageError};

#[derive(Clone, Debug)]
struct StoredKey {
    session_id: Vec<u8>,
    message_key: Key,
    sequence_number: u64,
}

/// In-memory storage for skipped message keys.
///
/// Can be shared between many sessions when wrapped in an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryKeysStorage {
    keys: RwLock<HashMap<Key, HashMap<u32, StoredKey>>>,
}

impl MemoryKeysStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes all records matching the predicate.
    fn retain<F>(&self, mut predicate: F) -> Result<(), KeysStorageError>
    where
        F: FnMut(&StoredKey) -> bool,
    {
        let mut keys = self
            .keys
            .write()
            .map_err(|_| KeysStorageError::LockPoisoned)?;
        keys.retain(|_, message_keys| {
            message_keys.retain(|_, stored| predicate(stored));
            !message_keys.is_empty()
        });
        Ok(())
    }
}

impl KeysStorage for MemoryKeysStorage {
    fn get(&self, index_key: &Key, message_number: u32) -> Result<Option<Key>, KeysStorageError> {
        let keys = self
            .keys
            .read()
            .map_err(|_| KeysStorageError::LockPoisoned)?;
        Ok(keys
            .get(index_key)
            .and_then(|message_keys| message_keys.get(&message_number))
            .map(|stored| stored.message_key.clone()))
    }

    fn put(
        &self,
        session_id: &[u8],
        index_key: &Key,
        message_number: u32,
        message_key: &Key,
        sequence_number: u64,
    ) -> Result<(), KeysStorageError> {
        let mut keys = self
            .keys
            .write()
            .map_err(|_| KeysStorageError::LockPoisoned)?;
        keys.entry(index_key.clone()).or_default().insert(
            message_number,
            StoredKey {
                session_id: session_id.to_vec(),
                message_key: message_key.clone(),
                sequence_number,
            },
        );
        Ok(())
    }

    fn delete_mk(&self, index_key: &Key, message_number: u32) -> Result<(), KeysStorageError> {
        let mut keys = self
            .keys
            .write()
            .map_err(|_| KeysStorageError::LockPoisoned)?;
        if let Some(message_keys) = keys.get_mut(index_key) {
            message_keys.remove(&message_number);
            if message_keys.is_empty() {
                keys.remove(index_key);
            }
        }
        Ok(())
    }

    fn count(&self, index_key: &Key) -> Result<usize, KeysStorageError> {
        let keys = self
            .keys
            .read()
            .map_err(|_| KeysStorageError::LockPoisoned)?;
        Ok(keys.get(index_key).map_or(0, |message_keys| message_keys.len()))
    }

    fn truncate_mks(&self, session_id: &[u8], max_keys: usize) -> Result<(), KeysStorageError> {
        let mut sequence_numbers: Vec<u64> = {
            let keys = self
                .keys
                .read()
                .map_err(|_| KeysStorageError::LockPoisoned)?;
            keys.values()
                .flat_map(|message_keys| message_keys.values())
                .filter(|stored| stored.session_id == session_id)
                .map(|stored| stored.sequence_number)
                .collect()
        };

        if sequence_numbers.len() <= max_keys {
            return Ok(());
        }

        // Keep the newest keys.
        sequence_numbers.sort_unstable();
        let delete_count = sequence_numbers.len() - max_keys;
        let newest_deleted = sequence_numbers[delete_count - 1];

        self.retain(|stored| {
            stored.session_id != session_id || stored.sequence_number > newest_deleted
        })
    }

    fn delete_old_mks(
        &self,
        session_id: &[u8],
        delete_until: u64,
    ) -> Result<(), KeysStorageError> {
        self.retain(|stored| {
            stored.session_id != session_id || stored.sequence_number > delete_until
        })
    }

    fn all(&self) -> Result<AllMessageKeys, KeysStorageError> {
        let keys = self
            .keys
            .read()
            .map_err(|_| KeysStorageError::LockPoisoned)?;
        Ok(keys
            .iter()
            .map(|(index_key, message_keys)| {
                let message_keys = message_keys
                    .iter()
                    .map(|(message_number, stored)| {
                        (*message_number, stored.message_key.clone())
                    })
                    .collect();
                (index_key.clone(), message_keys)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::key::Key;
    use crate::traits::KeysStorage;

    use super::MemoryKeysStorage;

    fn key(value: u8) -> Key {
        Key::from_bytes([value; 32])
    }

    #[test]
    fn put_get_delete() {
        let storage = MemoryKeysStorage::new();

        storage.put(b"session", &key(1), 3, &key(10), 0).unwrap();
        assert_eq!(storage.get(&key(1), 3).unwrap(), Some(key(10)));
        assert_eq!(storage.get(&key(1), 4).unwrap(), None);
        assert_eq!(storage.get(&key(2), 3).unwrap(), None);

        // Inserting again replaces the key.
        storage.put(b"session", &key(1), 3, &key(11), 1).unwrap();
        assert_eq!(storage.get(&key(1), 3).unwrap(), Some(key(11)));
        assert_eq!(storage.count(&key(1)).unwrap(), 1);

        storage.delete_mk(&key(1), 3).unwrap();
        assert_eq!(storage.get(&key(1), 3).unwrap(), None);
        assert_eq!(storage.count(&key(1)).unwrap(), 0);
        assert!(storage.all().unwrap().is_empty());

        // Deleting unknown keys does nothing.
        storage.delete_mk(&key(1), 3).unwrap();
    }

    #[test]
    fn truncate_oldest() {
        let storage = MemoryKeysStorage::new();

        for sequence_number in 0..5 {
            storage
                .put(
                    b"session",
                    &key(1),
                    sequence_number as u32,
                    &key(10),
                    sequence_number,
                )
                .unwrap();
        }
        storage.put(b"other", &key(2), 0, &key(20), 0).unwrap();

        storage.truncate_mks(b"session", 2).unwrap();
        assert_eq!(storage.count(&key(1)).unwrap(), 2);
        assert_eq!(storage.get(&key(1), 2).unwrap(), None);
        assert!(storage.get(&key(1), 3).unwrap().is_some());
        assert!(storage.get(&key(1), 4).unwrap().is_some());

        // Other sessions are not affected.
        assert_eq!(storage.count(&key(2)).unwrap(), 1);

        storage.truncate_mks(b"session", 0).unwrap();
        assert_eq!(storage.count(&key(1)).unwrap(), 0);
        assert_eq!(storage.count(&key(2)).unwrap(), 1);
    }

    #[test]
    fn delete_old() {
        let storage = MemoryKeysStorage::new();

        storage.put(b"session", &key(1), 0, &key(10), 0).unwrap();
        storage.put(b"session", &key(1), 1, &key(11), 1).unwrap();
        storage.put(b"session", &key(2), 0, &key(12), 2).unwrap();
        storage.put(b"other", &key(3), 0, &key(13), 0).unwrap();

        storage.delete_old_mks(b"session", 1).unwrap();
        assert_eq!(storage.count(&key(1)).unwrap(), 0);
        assert_eq!(storage.count(&key(2)).unwrap(), 1);
        assert_eq!(storage.count(&key(3)).unwrap(), 1);

        let all = storage.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&key(2)][&0], key(12));
    }
}

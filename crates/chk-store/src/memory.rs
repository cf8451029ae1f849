use std::collections::HashMap;
use std::sync::RwLock;

use chk_types::ContentKey;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::traits::ContentStore;

/// In-memory, HashMap-based content store.
///
/// Intended for tests and embedding. Blobs are held behind a `RwLock` and
/// re-verified against their key on every read, so a corrupted entry
/// surfaces as [`StoreError::HashMismatch`] instead of bad data.
pub struct InMemoryContentStore {
    blobs: RwLock<HashMap<ContentKey, Vec<u8>>>,
}

impl InMemoryContentStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|data| data.len() as u64)
            .sum()
    }

    /// Return a sorted list of all keys in the store.
    pub fn keys(&self) -> Vec<ContentKey> {
        let map = self.blobs.read().expect("lock poisoned");
        let mut keys: Vec<ContentKey> = map.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Replace the bytes stored under `key` without re-keying them.
    ///
    /// Simulates on-disk corruption for integrity tests. Returns `false` if
    /// the key was not present.
    pub fn corrupt(&self, key: &ContentKey, data: Vec<u8>) -> bool {
        let mut map = self.blobs.write().expect("lock poisoned");
        match map.get_mut(key) {
            Some(slot) => {
                *slot = data;
                true
            }
            None => false,
        }
    }

    /// Remove a blob. Returns `true` if it existed.
    pub fn remove(&self, key: &ContentKey) -> bool {
        self.blobs.write().expect("lock poisoned").remove(key).is_some()
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for InMemoryContentStore {
    fn get(&self, key: &ContentKey) -> StoreResult<Vec<u8>> {
        let map = self.blobs.read().expect("lock poisoned");
        let data = map.get(key).ok_or(StoreError::NotFound(*key))?;
        let computed = ContentKey::for_bytes(data);
        if computed != *key {
            return Err(StoreError::HashMismatch {
                key: *key,
                computed,
            });
        }
        Ok(data.clone())
    }

    fn put(&self, data: &[u8]) -> StoreResult<ContentKey> {
        let key = ContentKey::for_bytes(data);
        let mut map = self.blobs.write().expect("lock poisoned");
        // Identical bytes always hash identically, so an existing entry is
        // already the right content.
        map.entry(key).or_insert_with(|| {
            trace!(key = %key, len = data.len(), "stored blob");
            data.to_vec()
        });
        Ok(key)
    }

    fn contains(&self, key: &ContentKey) -> StoreResult<bool> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len();
        f.debug_struct("InMemoryContentStore")
            .field("blob_count", &count)
            .finish()
    }
}

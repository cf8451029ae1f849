use chk_types::ContentKey;

use crate::error::StoreResult;

/// Content-addressed blob store.
///
/// All implementations must satisfy these invariants:
/// - The key of a blob is the SHA-1 of its bytes; the same bytes always
///   produce the same key.
/// - `put` is idempotent: storing bytes that are already present is a no-op
///   returning the existing key, so concurrent writers of identical content
///   are harmless.
/// - Concurrent reads are always safe (blobs are immutable).
/// - All I/O errors are propagated, never silently ignored.
pub trait ContentStore: Send + Sync {
    /// Read a blob by key.
    ///
    /// Returns `Err(StoreError::NotFound)` if the blob does not exist.
    fn get(&self, key: &ContentKey) -> StoreResult<Vec<u8>>;

    /// Write a blob and return its content key.
    fn put(&self, data: &[u8]) -> StoreResult<ContentKey>;

    /// Check whether a blob exists in the store.
    fn contains(&self, key: &ContentKey) -> StoreResult<bool>;

    /// Read multiple blobs in one call.
    ///
    /// Default implementation calls `get()` for each key. Backends may
    /// override for better performance (e.g., fewer I/O round-trips).
    fn get_batch(&self, keys: &[ContentKey]) -> StoreResult<Vec<Vec<u8>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }
}

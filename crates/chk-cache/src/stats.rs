use serde::{Deserialize, Serialize};

/// Point-in-time counters for a [`BlobCache`](crate::BlobCache).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Single-use blobs held in memory.
    pub plain_blobs: usize,
    pub plain_bytes: usize,
    /// Reference-counted blobs held in memory.
    pub sticky_blobs: usize,
    pub sticky_bytes: usize,
    /// Blobs spilled to disk, in the shared file or their own file.
    pub disk_blobs: usize,
    pub disk_bytes: usize,
    /// Spilled blobs that own a private temp file.
    pub private_files: usize,
    /// Blobs with an outstanding expected reference count.
    pub tracked_refs: usize,
    pub revision_ids: usize,
    /// Flushes run since creation.
    pub flushes: usize,
    pub blobs_flushed: usize,
    pub bytes_flushed: usize,
}

impl CacheStats {
    /// Render as a single-line JSON object.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

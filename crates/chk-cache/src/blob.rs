use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::{NamedTempFile, TempDir, TempPath};
use tracing::{debug, info, warn};

use crate::config::BlobCacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::stats::CacheStats;

/// Where a spilled blob lives on disk.
struct DiskBlob {
    offset: u64,
    len: usize,
    /// Private file for large blobs; `None` means the shared spill file.
    file: Option<TempPath>,
}

/// The cache's temporary directory and its shared small-blob file.
struct SpillArea {
    dir: TempDir,
    small: NamedTempFile,
    small_len: u64,
}

impl SpillArea {
    fn create(config: &BlobCacheConfig) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&config.temp_prefix);
        let dir = match &config.temp_dir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        let small = tempfile::Builder::new()
            .prefix("small-blobs-")
            .tempfile_in(dir.path())?;
        debug!(path = %dir.path().display(), "created blob spill directory");
        Ok(Self {
            dir,
            small,
            small_len: 0,
        })
    }

    fn append_small(&mut self, data: &[u8]) -> io::Result<u64> {
        let offset = self.small_len;
        self.small.seek(SeekFrom::Start(offset))?;
        self.small.write_all(data)?;
        self.small_len += data.len() as u64;
        Ok(offset)
    }

    fn read_small(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        self.small.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.small.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_private(&self, data: &[u8]) -> io::Result<TempPath> {
        let mut file = tempfile::Builder::new()
            .prefix("blob-")
            .tempfile_in(self.dir.path())?;
        file.write_all(data)?;
        file.flush()?;
        Ok(file.into_temp_path())
    }

    fn close(self) -> io::Result<()> {
        self.small.close()?;
        self.dir.close()
    }
}

/// Tiered cache for blob payloads.
///
/// Blobs are either *plain* (read once, then forgotten) or *sticky* (kept
/// until their expected reference count is used up). Sticky blobs count
/// against `sticky_cache_size`; going over it flushes the largest sticky
/// blobs to disk until the tier is back at `sticky_flushed_size`. Small
/// blobs are appended to one shared spill file, larger ones each get a
/// private temp file.
///
/// Every file lives in a temporary directory owned by the cache. The
/// directory is removed by [`BlobCache::close`] or, failing that, on drop.
pub struct BlobCache {
    config: BlobCacheConfig,
    /// Expected reads per blob. `None` means nothing is counted and every
    /// blob is sticky.
    ref_counts: Option<HashMap<Vec<u8>, usize>>,
    plain: HashMap<Vec<u8>, Vec<u8>>,
    sticky: HashMap<Vec<u8>, Vec<u8>>,
    sticky_bytes: usize,
    disk: HashMap<Vec<u8>, DiskBlob>,
    spill: Option<SpillArea>,
    revision_ids: HashMap<Vec<u8>, Vec<u8>>,
    flushes: usize,
    blobs_flushed: usize,
    bytes_flushed: usize,
}

impl BlobCache {
    /// Cache without reference counts: every blob is sticky.
    pub fn new(config: BlobCacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ref_counts: None,
            plain: HashMap::new(),
            sticky: HashMap::new(),
            sticky_bytes: 0,
            disk: HashMap::new(),
            spill: None,
            revision_ids: HashMap::new(),
            flushes: 0,
            blobs_flushed: 0,
            bytes_flushed: 0,
        })
    }

    /// Cache that knows how many times each blob will be fetched.
    ///
    /// Blobs counted more than once are sticky and are released by their
    /// last fetch. Blobs counted exactly once are plain. An id missing from
    /// the table has an unknown count, so it is sticky and never released
    /// by a fetch.
    pub fn with_ref_counts(
        config: BlobCacheConfig,
        counts: impl IntoIterator<Item = (Vec<u8>, usize)>,
    ) -> CacheResult<Self> {
        let mut cache = Self::new(config)?;
        cache.ref_counts = Some(counts.into_iter().collect());
        Ok(cache)
    }

    pub fn config(&self) -> &BlobCacheConfig {
        &self.config
    }

    /// Store a blob, replacing any previous content for `id`.
    ///
    /// If the flush this store triggers fails, the new blob is dropped
    /// again before the error is returned. Blobs the flush already moved to
    /// disk stay there and remain fetchable.
    pub fn store_blob(&mut self, id: impl Into<Vec<u8>>, data: Vec<u8>) -> CacheResult<()> {
        let id = id.into();
        self.forget(&id)?;
        if self.is_sticky(&id, &data) {
            self.sticky_bytes += data.len();
            self.sticky.insert(id.clone(), data);
            if self.sticky_bytes > self.config.sticky_cache_size {
                if let Err(e) = self.flush_blobs_to_disk() {
                    if let Err(cleanup) = self.forget(&id) {
                        warn!(error = %cleanup, "failed to drop blob after failed flush");
                    }
                    return Err(e);
                }
            }
        } else {
            self.plain.insert(id, data);
        }
        Ok(())
    }

    /// Return the blob stored under `id`.
    ///
    /// Plain blobs are removed by the fetch. Sticky and spilled blobs use up
    /// one expected reference; the last one removes the blob and any file
    /// backing it. Fails with [`CacheError::BlobNotFound`] when no tier
    /// holds `id`.
    pub fn fetch_blob(&mut self, id: &[u8]) -> CacheResult<Vec<u8>> {
        if let Some(data) = self.plain.remove(id) {
            return Ok(data);
        }
        if let Some(record) = self.disk.get(id) {
            let content = match &record.file {
                Some(path) => std::fs::read(path)?,
                None => match self.spill.as_mut() {
                    Some(spill) => spill.read_small(record.offset, record.len)?,
                    None => {
                        return Err(CacheError::Io(io::Error::new(
                            io::ErrorKind::NotFound,
                            "shared spill file is gone",
                        )))
                    }
                },
            };
            if self.decref(id) {
                if let Some(DiskBlob {
                    file: Some(path), ..
                }) = self.disk.remove(id)
                {
                    path.close()?;
                }
            }
            return Ok(content);
        }
        let content = self
            .sticky
            .get(id)
            .cloned()
            .ok_or_else(|| CacheError::BlobNotFound(String::from_utf8_lossy(id).into_owned()))?;
        if self.decref(id) {
            self.sticky.remove(id);
            self.sticky_bytes -= content.len();
        }
        Ok(content)
    }

    /// Returns `true` if any tier holds `id`.
    pub fn contains(&self, id: &[u8]) -> bool {
        self.plain.contains_key(id) || self.sticky.contains_key(id) || self.disk.contains_key(id)
    }

    /// Move sticky blobs to disk, largest first, until the sticky tier is at
    /// or below `sticky_flushed_size`.
    pub fn flush_blobs_to_disk(&mut self) -> CacheResult<()> {
        let mut by_size: Vec<(usize, Vec<u8>)> = self
            .sticky
            .iter()
            .map(|(id, data)| (data.len(), id.clone()))
            .collect();
        by_size.sort();
        let total = by_size.len();

        if self.spill.is_none() {
            self.spill = Some(SpillArea::create(&self.config)?);
        }
        let Some(spill) = self.spill.as_mut() else {
            return Ok(());
        };

        let mut count = 0usize;
        let mut bytes = 0usize;
        let mut small_bytes = 0usize;
        while self.sticky_bytes > self.config.sticky_flushed_size {
            let Some((len, id)) = by_size.pop() else { break };
            let Some(data) = self.sticky.get(&id) else { continue };
            let record = if len < self.config.small_blob_threshold {
                small_bytes += len;
                DiskBlob {
                    offset: spill.append_small(data)?,
                    len,
                    file: None,
                }
            } else {
                DiskBlob {
                    offset: 0,
                    len,
                    file: Some(spill.write_private(data)?),
                }
            };
            self.sticky.remove(&id);
            self.sticky_bytes -= len;
            self.disk.insert(id, record);
            count += 1;
            bytes += len;
        }

        self.flushes += 1;
        self.blobs_flushed += count;
        self.bytes_flushed += bytes;
        info!(
            flushed = count,
            sticky = total,
            bytes,
            small_bytes,
            resident = self.sticky_bytes,
            "flushed sticky blobs to disk"
        );
        Ok(())
    }

    /// Record the revision id a mark resolved to.
    pub fn set_revision_id(&mut self, mark: impl Into<Vec<u8>>, revision_id: impl Into<Vec<u8>>) {
        self.revision_ids.insert(mark.into(), revision_id.into());
    }

    pub fn revision_id(&self, mark: &[u8]) -> Option<&[u8]> {
        self.revision_ids.get(mark).map(Vec::as_slice)
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            plain_blobs: self.plain.len(),
            plain_bytes: self.plain.values().map(Vec::len).sum(),
            sticky_blobs: self.sticky.len(),
            sticky_bytes: self.sticky_bytes,
            disk_blobs: self.disk.len(),
            disk_bytes: self.disk.values().map(|r| r.len).sum(),
            private_files: self.disk.values().filter(|r| r.file.is_some()).count(),
            tracked_refs: self.ref_counts.as_ref().map_or(0, HashMap::len),
            revision_ids: self.revision_ids.len(),
            flushes: self.flushes,
            blobs_flushed: self.blobs_flushed,
            bytes_flushed: self.bytes_flushed,
        }
    }

    /// Log the current counters and return them.
    pub fn dump_stats(&self) -> CacheStats {
        let stats = self.stats();
        match stats.to_json() {
            Ok(json) => info!(stats = %json, "blob cache statistics"),
            Err(e) => warn!(error = %e, "failed to render blob cache statistics"),
        }
        stats
    }

    /// Drop every cached blob and revision id. Expected reference counts
    /// are kept.
    pub fn clear_all(&mut self) {
        self.plain.clear();
        self.sticky.clear();
        self.sticky_bytes = 0;
        self.revision_ids.clear();
        if let Err(e) = self.release_disk() {
            warn!(error = %e, "failed to remove blob cache spill files");
        }
    }

    /// Remove every spill file and the temporary directory.
    ///
    /// Safe to call more than once; later calls find nothing to remove.
    pub fn close(&mut self) -> CacheResult<()> {
        self.plain.clear();
        self.sticky.clear();
        self.sticky_bytes = 0;
        self.release_disk()?;
        Ok(())
    }

    /// The temporary directory, once the first flush has created it.
    pub fn spill_dir(&self) -> Option<&Path> {
        self.spill.as_ref().map(|s| s.dir.path())
    }

    fn is_sticky(&self, id: &[u8], data: &[u8]) -> bool {
        match &self.ref_counts {
            None => true,
            Some(counts) => counts.get(id).map_or(true, |&n| n > 1) || data.is_empty(),
        }
    }

    /// Use up one reference to `id`. Returns `true` when that was the last.
    fn decref(&mut self, id: &[u8]) -> bool {
        let Some(counts) = self.ref_counts.as_mut() else {
            return false;
        };
        let Some(count) = counts.get_mut(id) else {
            return false;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            counts.remove(id);
            true
        } else {
            false
        }
    }

    /// Drop `id` from every tier without touching its reference count.
    fn forget(&mut self, id: &[u8]) -> io::Result<()> {
        self.plain.remove(id);
        if let Some(old) = self.sticky.remove(id) {
            self.sticky_bytes -= old.len();
        }
        if let Some(DiskBlob {
            file: Some(path), ..
        }) = self.disk.remove(id)
        {
            path.close()?;
        }
        Ok(())
    }

    fn release_disk(&mut self) -> io::Result<()> {
        let mut first_error = None;
        for (_, record) in self.disk.drain() {
            if let Some(path) = record.file {
                if let Err(e) = path.close() {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(spill) = self.spill.take() {
            let dir = spill.dir.path().to_path_buf();
            match spill.close() {
                Ok(()) => debug!(path = %dir.display(), "removed blob spill directory"),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for BlobCache {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to remove blob cache spill files");
        }
    }
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCache")
            .field("plain", &self.plain.len())
            .field("sticky", &self.sticky.len())
            .field("sticky_bytes", &self.sticky_bytes)
            .field("disk", &self.disk.len())
            .finish()
    }
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Limits and locations for a [`BlobCache`](crate::BlobCache).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobCacheConfig {
    /// Sticky bytes held in memory before a flush to disk is triggered.
    pub sticky_cache_size: usize,
    /// A flush moves blobs to disk until the sticky tier is at or below this.
    pub sticky_flushed_size: usize,
    /// Blobs smaller than this share one spill file; larger ones get their own.
    pub small_blob_threshold: usize,
    /// Prefix for the cache's temporary directory name.
    pub temp_prefix: String,
    /// Parent directory for spill files. `None` uses the system temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl Default for BlobCacheConfig {
    fn default() -> Self {
        Self {
            sticky_cache_size: 300 * 1024 * 1024,
            sticky_flushed_size: 100 * 1024 * 1024,
            small_blob_threshold: 25 * 1024,
            temp_prefix: "chk-blobs-".into(),
            temp_dir: None,
        }
    }
}

impl BlobCacheConfig {
    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> CacheResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| CacheError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would disable or invert the sticky tier.
    pub fn validate(&self) -> CacheResult<()> {
        if self.sticky_cache_size == 0 {
            return Err(CacheError::InvalidConfig(
                "sticky_cache_size must be greater than zero".into(),
            ));
        }
        if self.sticky_flushed_size > self.sticky_cache_size {
            return Err(CacheError::InvalidConfig(format!(
                "sticky_flushed_size ({}) exceeds sticky_cache_size ({})",
                self.sticky_flushed_size, self.sticky_cache_size
            )));
        }
        Ok(())
    }
}

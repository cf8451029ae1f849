/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The blob is in none of the cache tiers.
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// The configuration cannot be used.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// Spill file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

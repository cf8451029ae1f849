use chk_types::ContentKey;

/// Errors from content store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob was not found.
    #[error("content not found: {0}")]
    NotFound(ContentKey),

    /// Content hash mismatch on read (data corruption).
    #[error("hash mismatch for {key}: stored bytes hash to {computed}")]
    HashMismatch {
        key: ContentKey,
        computed: ContentKey,
    },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

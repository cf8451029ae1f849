use chk_store::StoreError;
use chk_types::{ContentKey, Key};

/// Errors from CHK map operations.
#[derive(Debug, thiserror::Error)]
pub enum ChkError {
    /// The key is not in the map. A normal outcome of lookups.
    #[error("key not found: {0}")]
    NotFound(Key),

    /// Stored node bytes could not be parsed or failed an integrity check.
    #[error("malformed node {}: {reason}", describe(.key))]
    Malformed {
        key: Option<ContentKey>,
        reason: String,
    },

    /// The key cannot be stored in this map.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: Key, reason: String },

    /// A delta contradicts the current map contents.
    #[error("inconsistent delta: {0}")]
    InconsistentDelta(String),

    /// The configuration cannot be used.
    #[error("invalid map configuration: {0}")]
    InvalidConfig(String),

    /// Error from the underlying content store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

fn describe(key: &Option<ContentKey>) -> String {
    match key {
        Some(key) => key.to_string(),
        None => "(unsaved)".to_string(),
    }
}

impl ChkError {
    pub(crate) fn malformed(key: Option<ContentKey>, reason: impl Into<String>) -> Self {
        ChkError::Malformed {
            key,
            reason: reason.into(),
        }
    }
}

/// Result alias for CHK map operations.
pub type ChkResult<T> = Result<T, ChkError>;

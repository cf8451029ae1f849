use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("bad index signature: {0:?}")]
    BadSignature(String),

    #[error("corrupt index at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

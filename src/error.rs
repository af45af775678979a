use thiserror::Error;

use crate::AccountId;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Quota exceeded for account {account}: requested {requested} bytes, {available} available")]
    QuotaExceeded {
        account: AccountId,
        requested: u64,
        available: u64,
    },
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
    #[error("Invalid link: {0}")]
    InvalidLink(String),
    #[error("Job cancelled")]
    Cancelled,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("{0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

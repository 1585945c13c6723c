use std::path::PathBuf;

use thiserror::Error;

use crate::encryption::EncryptionError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("stored record is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("failed to initialise backing store at {path:?}: {source}")]
    ResourceInit {
        path: Option<PathBuf>,
        #[source]
        source: Box<StoreError>,
    },
    #[error("record not found: {0}")]
    NotFound(u32),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("append-only store expected index {expected}, got {got}")]
    NonSequentialAppend { expected: u32, got: u32 },
    #[error("record of {0} bytes does not fit a u32 length prefix")]
    RecordTooLarge(usize),
    #[error("record index space exhausted")]
    IndexOverflow,
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    pub(crate) fn resource_init(path: Option<PathBuf>, source: impl Into<StoreError>) -> Self {
        StoreError::ResourceInit {
            path,
            source: Box::new(source.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

use formula_text_store::StoreError;
use thiserror::Error;

use crate::address::{A1ParseError, CellRef};
use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(StoreError),
    /// A stored or incoming text record could not be decoded.
    #[error("malformed text record: {0}")]
    RecordParse(#[from] CodecError),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("no entry at index {0}")]
    NotFound(u32),
    #[error("no comment at {0}")]
    CommentNotFound(CellRef),
    #[error("a comment already exists at {0}")]
    DuplicateComment(CellRef),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("invalid cell address: {0}")]
    InvalidAddress(#[from] A1ParseError),
}

impl From<StoreError> for TableError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(index) => TableError::NotFound(index),
            StoreError::Unsupported(what) => TableError::Unsupported(what),
            StoreError::Io(err) => TableError::Io(err),
            other => TableError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TableError>;

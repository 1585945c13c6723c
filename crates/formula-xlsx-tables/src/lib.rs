//! Shared strings and comments tables for XLSX parts that may not fit in memory.
//!
//! Both tables store their text records in a [`formula_text_store::RecordStore`], chosen
//! through [`TableConfig::store`]:
//!
//! - [`SharedStringsTable`]: `xl/sharedStrings.xml`. Application adds are interned; loads
//!   keep the source part's index assignment.
//! - [`CommentsTable`]: a legacy `xl/commentsN.xml` part, keyed by cell address, with an
//!   in-memory [`AuthorTable`].
//!
//! [`TextRunCodec`] converts between `<si>` / `<text>` containers and stored records, either
//! keeping the full run markup ([`FidelityMode::Full`]) or only the plain text
//! ([`FidelityMode::Simplified`]).

pub mod address;
pub mod codec;
mod comments;
mod config;
mod error;
mod rich_text;
mod shared_strings;
mod xstring;

pub use address::{A1ParseError, CellRef};
pub use codec::{CodecError, Container, DecodeOptions, Record, TextRunCodec};
pub use comments::{AuthorTable, CommentAccess, CommentEntry, CommentMut, CommentsTable};
pub use config::{FidelityMode, ParseMode, TableConfig, SPREADSHEETML_NS};
pub use error::{Result, TableError};
pub use rich_text::{PhoneticRun, RichText, TextRun};
pub use shared_strings::SharedStringsTable;

pub use formula_text_store::{BackendKind, StoreConfig, StoreKind};

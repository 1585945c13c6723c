//! Record stores for spreadsheet text tables that may not fit in memory.
//!
//! A table (shared strings, comments) keeps its text records in one of three
//! interchangeable [`RecordStore`] backends, chosen through [`StoreConfig`]:
//! - [`MapStore`]: concurrent in-memory map
//! - [`DiskStore`]: SQLite database in a temp file, optionally encrypted per instance
//! - [`CacheStore`]: append-only temp file log with a bounded LRU in front
//!
//! [`DedupIndex`] layers string interning (dense indices, `count` / `unique_count`)
//! on top of any backend.

mod cache;
mod config;
mod disk;
pub mod encryption;
mod error;
mod intern;
mod map;
mod record_store;
mod schema;

pub use cache::{read_log_records, CacheStats, CacheStore};
pub use config::{BackendKind, SharedRng, StoreConfig, DEFAULT_CACHE_CAPACITY};
pub use disk::DiskStore;
pub use encryption::{EncryptionError, RecordCipher};
pub use error::{Result, StoreError};
pub use intern::{DedupIndex, DuplicatePolicy};
pub use map::MapStore;
pub use record_store::{open_store, RecordStore, RecordVisitor, StoreKind};

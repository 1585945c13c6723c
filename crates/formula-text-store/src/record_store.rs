use std::io;
use std::sync::{Mutex, MutexGuard};

use tempfile::NamedTempFile;

use crate::cache::CacheStore;
use crate::config::{BackendKind, StoreConfig};
use crate::disk::DiskStore;
use crate::error::{Result, StoreError};
use crate::map::MapStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Map,
    Disk,
    Cache,
}

/// Callback used by [`RecordStore::visit_in_order`].
pub type RecordVisitor<'a> = dyn FnMut(u32, &str) -> io::Result<()> + 'a;

/// Persists `index -> record` pairs for a single table.
///
/// Records are opaque strings (plain text or serialized XML). Implementations keep an
/// optional `key -> index` map used by [`DedupIndex`](crate::DedupIndex); stores that
/// cannot afford one report `supports_key_lookup() == false`.
pub trait RecordStore: std::fmt::Debug + Send + Sync {
    fn kind(&self) -> StoreKind;

    fn put(&self, index: u32, record: &str) -> Result<()>;

    fn get(&self, index: u32) -> Result<Option<String>>;

    /// Drops the record at `index`. Returns `false` when nothing was removed.
    fn remove(&self, index: u32) -> Result<bool>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn supports_key_lookup(&self) -> bool;

    fn find_key(&self, key: &str) -> Result<Option<u32>>;

    fn put_key(&self, key: &str, index: u32) -> Result<()>;

    /// Calls `visitor` for every stored record in ascending index order.
    fn visit_in_order(&self, visitor: &mut RecordVisitor<'_>) -> Result<()>;

    /// Releases the backing resources. Safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// Build the store selected by `config.kind`.
pub fn open_store(config: &StoreConfig) -> Result<Box<dyn RecordStore>> {
    let store: Box<dyn RecordStore> = match config.kind {
        BackendKind::Map => Box::new(MapStore::new()),
        BackendKind::Disk { encrypt } => Box::new(DiskStore::create(config, encrypt)?),
        BackendKind::Cache { capacity } => Box::new(CacheStore::create(config, capacity)?),
    };
    Ok(store)
}

pub(crate) fn create_backing_file(config: &StoreConfig, prefix: &str) -> Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix).suffix(".tmp");
    let file = match &config.temp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    };
    let file = file.map_err(|err| StoreError::resource_init(config.temp_dir.clone(), err))?;
    log::debug!("created backing file {:?}", file.path());
    Ok(file)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

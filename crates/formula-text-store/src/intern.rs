use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::record_store::{lock, RecordStore, RecordVisitor, StoreKind};

/// What [`DedupIndex::intern`] does when the canonical key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Return the existing index. Used for values authored by the application.
    Reuse,
    /// Always allocate a new index. Used when loading a saved table, whose index
    /// assignment is referenced by the rest of the document and must be reproduced.
    Keep,
}

/// Interns records into a [`RecordStore`], handing out dense indices in first-insertion
/// order.
///
/// The canonical key of a record is its exact serialized text. `count` tracks every
/// reference (duplicates included) and `unique_count` the number of stored records.
pub struct DedupIndex {
    store: Box<dyn RecordStore>,
    count: AtomicU64,
    unique_count: AtomicU64,
    writer: Mutex<()>,
}

impl DedupIndex {
    pub fn new(store: Box<dyn RecordStore>) -> Self {
        Self {
            store,
            count: AtomicU64::new(0),
            unique_count: AtomicU64::new(0),
            writer: Mutex::new(()),
        }
    }

    pub fn store_kind(&self) -> StoreKind {
        self.store.kind()
    }

    pub fn supports_key_lookup(&self) -> bool {
        self.store.supports_key_lookup()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn unique_count(&self) -> u64 {
        self.unique_count.load(Ordering::Acquire)
    }

    /// Adopt a reference count declared by a source document.
    pub fn set_declared_count(&self, count: u64) {
        self.count.store(count, Ordering::Release);
    }

    pub fn intern(&self, record: &str, policy: DuplicatePolicy) -> Result<u32> {
        let _writer = lock(&self.writer);

        if policy == DuplicatePolicy::Reuse {
            if let Some(existing) = self.store.find_key(record)? {
                self.count.fetch_add(1, Ordering::AcqRel);
                return Ok(existing);
            }
        }

        let next = self.unique_count.load(Ordering::Acquire);
        let index = u32::try_from(next).map_err(|_| StoreError::IndexOverflow)?;
        self.store.put(index, record)?;
        // Under `Keep` the first occurrence stays canonical for later `Reuse` lookups.
        if policy == DuplicatePolicy::Reuse || self.store.find_key(record)?.is_none() {
            self.store.put_key(record, index)?;
        }

        self.unique_count.store(next + 1, Ordering::Release);
        self.count.fetch_add(1, Ordering::AcqRel);
        Ok(index)
    }

    pub fn lookup(&self, index: u32) -> Result<String> {
        if u64::from(index) >= self.unique_count() {
            return Err(StoreError::NotFound(index));
        }
        self.store.get(index)?.ok_or(StoreError::NotFound(index))
    }

    /// Index previously assigned to `key`.
    ///
    /// Stores without a key map (the cache store) cannot answer this and report
    /// [`StoreError::Unsupported`].
    pub fn index_of(&self, key: &str) -> Result<Option<u32>> {
        if !self.store.supports_key_lookup() {
            return Err(StoreError::Unsupported(
                "string-keyed lookups are not available on the cache store",
            ));
        }
        self.store.find_key(key)
    }

    pub fn visit_in_order(&self, visitor: &mut RecordVisitor<'_>) -> Result<()> {
        self.store.visit_in_order(visitor)
    }

    pub fn close(&mut self) -> Result<()> {
        self.store.close()
    }
}

impl std::fmt::Debug for DedupIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupIndex")
            .field("store", &self.store.kind())
            .field("count", &self.count())
            .field("unique_count", &self.unique_count())
            .finish()
    }
}

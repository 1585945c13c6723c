use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use lru::LruCache;
use tempfile::NamedTempFile;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::record_store::{create_backing_file, lock, RecordStore, RecordVisitor, StoreKind};

const FILE_PREFIX: &str = "formula-text-cache-";
const LENGTH_PREFIX_BYTES: u64 = 4;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct Inner {
    file: Option<NamedTempFile>,
    /// Byte offset of each record's length prefix, indexed by record index.
    offsets: Vec<u64>,
    file_len: u64,
    records: LruCache<u32, String>,
    stats: CacheStats,
}

/// Append-only log of `[u32 BE length][UTF-8 bytes]` records with a bounded LRU of
/// decoded records in front of it.
///
/// The offset list is the only index and lives in memory; the file is not meant to be
/// reopened. All file positioning happens under one lock, so concurrent readers are
/// safe but serialized.
///
/// There is no `key -> index` map at this scale: key lookups always miss, which makes
/// every insert through [`DedupIndex`](crate::DedupIndex) a new unique entry.
pub struct CacheStore {
    inner: Mutex<Inner>,
}

impl CacheStore {
    pub fn create(config: &StoreConfig, capacity: NonZeroUsize) -> Result<Self> {
        // `NamedTempFile` deletes itself if anything below fails.
        let file = create_backing_file(config, FILE_PREFIX)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                file: Some(file),
                offsets: Vec::new(),
                file_len: 0,
                records: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        })
    }

    pub fn path(&self) -> Option<std::path::PathBuf> {
        lock(&self.inner)
            .file
            .as_ref()
            .map(|file| file.path().to_path_buf())
    }

    pub fn capacity(&self) -> usize {
        lock(&self.inner).records.cap().get()
    }

    /// Whether `index` is currently held in the LRU. Does not affect recency.
    pub fn is_cached(&self, index: u32) -> bool {
        lock(&self.inner).records.contains(&index)
    }

    pub fn cached_len(&self) -> usize {
        lock(&self.inner).records.len()
    }

    pub fn stats_snapshot(&self) -> CacheStats {
        lock(&self.inner).stats
    }

    fn teardown(&mut self) -> Result<()> {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.records.clear();
        inner.offsets.clear();
        inner.file_len = 0;
        if let Some(file) = inner.file.take() {
            log::debug!("removing backing file {:?}", file.path());
            file.close()?;
        }
        Ok(())
    }
}

impl Inner {
    fn file_mut(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .map(NamedTempFile::as_file_mut)
            .ok_or(StoreError::Closed)
    }

    fn read_at(&mut self, offset: u64) -> Result<String> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut len_bytes = [0u8; LENGTH_PREFIX_BYTES as usize];
        file.read_exact(&mut len_bytes)?;
        let len = u32::from_be_bytes(len_bytes) as usize;

        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)?;
        Ok(String::from_utf8(payload)?)
    }

    fn append(&mut self, record: &str) -> Result<()> {
        let bytes = record.as_bytes();
        let len = u32::try_from(bytes.len()).map_err(|_| StoreError::RecordTooLarge(bytes.len()))?;

        let offset = self.file_len;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&len.to_be_bytes())?;
        file.write_all(bytes)?;

        self.offsets.push(offset);
        self.file_len = offset + LENGTH_PREFIX_BYTES + bytes.len() as u64;
        Ok(())
    }
}

impl RecordStore for CacheStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Cache
    }

    fn put(&self, index: u32, record: &str) -> Result<()> {
        let mut inner = lock(&self.inner);
        let expected =
            u32::try_from(inner.offsets.len()).map_err(|_| StoreError::IndexOverflow)?;
        if index != expected {
            return Err(StoreError::NonSequentialAppend {
                expected,
                got: index,
            });
        }
        inner.append(record)
    }

    fn get(&self, index: u32) -> Result<Option<String>> {
        let mut inner = lock(&self.inner);
        if inner.file.is_none() {
            return Err(StoreError::Closed);
        }
        if let Some(hit) = inner.records.get(&index) {
            let hit = hit.clone();
            inner.stats.hits += 1;
            return Ok(Some(hit));
        }
        let Some(&offset) = inner.offsets.get(index as usize) else {
            return Ok(None);
        };

        inner.stats.misses += 1;
        let record = inner.read_at(offset)?;
        inner.records.put(index, record.clone());
        Ok(Some(record))
    }

    fn remove(&self, _index: u32) -> Result<bool> {
        // The log is append-only; superseded records stay until the file is deleted.
        Ok(false)
    }

    fn len(&self) -> usize {
        lock(&self.inner).offsets.len()
    }

    fn supports_key_lookup(&self) -> bool {
        false
    }

    fn find_key(&self, _key: &str) -> Result<Option<u32>> {
        Ok(None)
    }

    fn put_key(&self, _key: &str, _index: u32) -> Result<()> {
        Ok(())
    }

    fn visit_in_order(&self, visitor: &mut RecordVisitor<'_>) -> Result<()> {
        let mut inner = lock(&self.inner);
        let count = inner.offsets.len();
        let file = inner.file_mut()?;
        file.seek(SeekFrom::Start(0))?;

        // Records are laid out back to back in index order, so one sequential pass
        // suffices and the LRU is left untouched.
        let mut reader = BufReader::new(file);
        let mut len_bytes = [0u8; LENGTH_PREFIX_BYTES as usize];
        for index in 0..count {
            reader.read_exact(&mut len_bytes)?;
            let mut payload = vec![0u8; u32::from_be_bytes(len_bytes) as usize];
            reader.read_exact(&mut payload)?;
            let record = String::from_utf8(payload)?;
            visitor(index as u32, &record)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.teardown()
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            log::warn!("failed to release cache store: {err}");
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("CacheStore")
            .field("path", &inner.file.as_ref().map(|file| file.path()))
            .field("records", &inner.offsets.len())
            .field("cached", &inner.records.len())
            .field("capacity", &inner.records.cap())
            .finish()
    }
}

/// Read back a raw log file, for inspecting the on-disk framing.
pub fn read_log_records(path: &Path) -> Result<Vec<String>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let mut out = Vec::new();
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        let header = bytes
            .get(cursor..cursor + LENGTH_PREFIX_BYTES as usize)
            .ok_or(StoreError::Io(std::io::ErrorKind::UnexpectedEof.into()))?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        cursor += LENGTH_PREFIX_BYTES as usize;
        let payload = bytes
            .get(cursor..cursor + len)
            .ok_or(StoreError::Io(std::io::ErrorKind::UnexpectedEof.into()))?;
        out.push(String::from_utf8(payload.to_vec())?);
        cursor += len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    fn store(capacity: usize) -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let capacity = NonZeroUsize::new(capacity).expect("non-zero capacity");
        let config =
            StoreConfig::new(BackendKind::Cache { capacity }).with_temp_dir(dir.path());
        let store = CacheStore::create(&config, capacity).expect("create cache store");
        (dir, store)
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let (_dir, store) = store(2);
        for (idx, text) in ["zero", "one", "two"].into_iter().enumerate() {
            store.put(idx as u32, text).expect("put");
        }
        // Writes never populate the cache.
        assert_eq!(store.cached_len(), 0);

        assert_eq!(store.get(0).expect("get 0").as_deref(), Some("zero"));
        assert_eq!(store.get(1).expect("get 1").as_deref(), Some("one"));
        // Touch 0 again so 1 becomes the least recently used entry.
        assert_eq!(store.get(0).expect("get 0 again").as_deref(), Some("zero"));
        assert_eq!(store.get(2).expect("get 2").as_deref(), Some("two"));

        assert!(store.is_cached(0));
        assert!(!store.is_cached(1));
        assert!(store.is_cached(2));
        assert_eq!(
            store.stats_snapshot(),
            CacheStats { hits: 1, misses: 3 }
        );
    }

    #[test]
    fn log_uses_big_endian_length_prefixes() {
        let (_dir, store) = store(4);
        store.put(0, "ab").expect("put");
        store.put(1, "日本").expect("put");

        let path = store.path().expect("backing file");
        let bytes = std::fs::read(&path).expect("read log");
        assert_eq!(&bytes[..6], &[0, 0, 0, 2, b'a', b'b']);
        assert_eq!(&bytes[6..10], &[0, 0, 0, 6]);
        assert_eq!(
            read_log_records(&path).expect("parse log"),
            vec!["ab".to_string(), "日本".to_string()]
        );
    }

    #[test]
    fn put_must_append() {
        let (_dir, store) = store(2);
        store.put(0, "a").expect("put");
        let err = store.put(5, "b").expect_err("gap should be rejected");
        assert!(matches!(
            err,
            StoreError::NonSequentialAppend { expected: 1, got: 5 }
        ));
    }

    #[test]
    fn missing_index_is_none() {
        let (_dir, store) = store(2);
        store.put(0, "a").expect("put");
        assert_eq!(store.get(1).expect("get"), None);
    }

    #[test]
    fn close_deletes_log() {
        let (_dir, mut store) = store(2);
        store.put(0, "a").expect("put");
        let path = store.path().expect("backing file");
        store.close().expect("close");
        store.close().expect("close again");
        assert!(!path.exists());
        assert!(matches!(store.get(0), Err(StoreError::Closed)));
    }
}

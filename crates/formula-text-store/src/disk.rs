use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tempfile::TempPath;

use crate::config::StoreConfig;
use crate::encryption::RecordCipher;
use crate::error::{Result, StoreError};
use crate::record_store::{create_backing_file, lock, RecordStore, RecordVisitor, StoreKind};
use crate::schema;

const FILE_PREFIX: &str = "formula-text-store-";

/// SQLite-backed store living in a temp file.
///
/// The database is scratch space: it is created eagerly, never reopened, and deleted on
/// [`RecordStore::close`] (or drop). With encryption enabled every payload is sealed with
/// a key that only exists in this instance.
#[derive(Debug)]
pub struct DiskStore {
    conn: Mutex<Option<Connection>>,
    path: Option<TempPath>,
    cipher: Option<RecordCipher>,
    len: AtomicUsize,
}

impl DiskStore {
    pub fn create(config: &StoreConfig, encrypt: bool) -> Result<Self> {
        Self::create_with(config, encrypt, schema::init)
    }

    pub(crate) fn create_with(
        config: &StoreConfig,
        encrypt: bool,
        init: impl FnOnce(&Connection) -> rusqlite::Result<()>,
    ) -> Result<Self> {
        let path = create_backing_file(config, FILE_PREFIX)?.into_temp_path();

        let conn = match Connection::open(&path) {
            Ok(conn) => conn,
            Err(err) => return Err(abort_create(None, path, err.into())),
        };
        if let Err(err) = init(&conn) {
            return Err(abort_create(Some(conn), path, err.into()));
        }

        let cipher = encrypt.then(|| RecordCipher::generate(&config.rng));

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path),
            cipher,
            len: AtomicUsize::new(0),
        })
    }

    /// Location of the backing database while the store is open.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = lock(&self.conn);
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn)
    }

    fn seal(&self, index: u32, record: &str) -> Result<Vec<u8>> {
        match &self.cipher {
            Some(cipher) => Ok(cipher.seal(index, record.as_bytes())?),
            None => Ok(record.as_bytes().to_vec()),
        }
    }

    fn open_payload(&self, index: u32, payload: Vec<u8>) -> Result<String> {
        let bytes = match &self.cipher {
            Some(cipher) => cipher.open(index, &payload)?,
            None => payload,
        };
        Ok(String::from_utf8(bytes)?)
    }

    fn key_bytes(&self, key: &str) -> Result<Vec<u8>> {
        match &self.cipher {
            Some(cipher) => Ok(cipher.key_digest(key.as_bytes())?),
            None => Ok(key.as_bytes().to_vec()),
        }
    }

    fn teardown(&mut self) -> Result<()> {
        let mut first_err: Option<StoreError> = None;

        let conn = match self.conn.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(conn) = conn {
            if let Err((_, err)) = conn.close() {
                first_err.get_or_insert(err.into());
            }
        }

        if let Some(path) = self.path.take() {
            log::debug!("removing backing file {:?}", &*path);
            if let Err(err) = path.close() {
                first_err.get_or_insert(err.into());
            }
        }

        self.len.store(0, Ordering::Release);
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Roll back a half-built store: close the engine first, then delete the file.
fn abort_create(conn: Option<Connection>, path: TempPath, err: StoreError) -> StoreError {
    let file = path.to_path_buf();
    if let Some(conn) = conn {
        if let Err((_, close_err)) = conn.close() {
            log::warn!("failed to close partially initialised store {file:?}: {close_err}");
        }
    }
    if let Err(remove_err) = path.close() {
        log::warn!("failed to remove partially initialised store {file:?}: {remove_err}");
    }
    StoreError::resource_init(Some(file), err)
}

impl RecordStore for DiskStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Disk
    }

    fn put(&self, index: u32, record: &str) -> Result<()> {
        let payload = self.seal(index, record)?;
        self.with_conn(|conn| {
            let existed = conn
                .query_row(
                    "SELECT 1 FROM records WHERE idx = ?1",
                    params![index],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            conn.execute(
                "INSERT OR REPLACE INTO records (idx, payload) VALUES (?1, ?2)",
                params![index, payload],
            )?;
            if !existed {
                self.len.fetch_add(1, Ordering::AcqRel);
            }
            Ok(())
        })
    }

    fn get(&self, index: u32) -> Result<Option<String>> {
        let payload = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT payload FROM records WHERE idx = ?1",
                    params![index],
                    |r| r.get::<_, Vec<u8>>(0),
                )
                .optional()?)
        })?;
        payload
            .map(|payload| self.open_payload(index, payload))
            .transpose()
    }

    fn remove(&self, index: u32) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM records WHERE idx = ?1", params![index])? > 0;
            if removed {
                self.len.fetch_sub(1, Ordering::AcqRel);
            }
            Ok(removed)
        })
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    fn supports_key_lookup(&self) -> bool {
        true
    }

    fn find_key(&self, key: &str) -> Result<Option<u32>> {
        let key = self.key_bytes(key)?;
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT idx FROM record_keys WHERE key = ?1",
                    params![key],
                    |r| r.get::<_, u32>(0),
                )
                .optional()?)
        })
    }

    fn put_key(&self, key: &str, index: u32) -> Result<()> {
        let key = self.key_bytes(key)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO record_keys (key, idx) VALUES (?1, ?2)",
                params![key, index],
            )?;
            Ok(())
        })
    }

    fn visit_in_order(&self, visitor: &mut RecordVisitor<'_>) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT idx, payload FROM records ORDER BY idx")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let index: u32 = row.get(0)?;
                let payload: Vec<u8> = row.get(1)?;
                let record = self.open_payload(index, payload)?;
                visitor(index, &record)?;
            }
            Ok(())
        })
    }

    fn close(&mut self) -> Result<()> {
        self.teardown()
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            log::warn!("failed to release disk store: {err}");
        }
    }
}

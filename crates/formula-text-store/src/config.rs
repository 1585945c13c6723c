use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Default number of decoded records held by [`BackendKind::Cache`].
pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(cap) => cap,
    None => unreachable!(),
};

/// RNG handle shared by every store built from one configuration.
pub type SharedRng = Arc<Mutex<StdRng>>;

/// Which [`RecordStore`](crate::RecordStore) implementation backs a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// Unbounded concurrent in-memory map.
    #[default]
    Map,
    /// SQLite database in a temp file, deleted on close.
    Disk {
        /// Seal every payload with a per-instance key that is never persisted.
        encrypt: bool,
    },
    /// Append-only temp file log with a bounded LRU of decoded records.
    Cache { capacity: NonZeroUsize },
}

impl BackendKind {
    pub fn cache() -> Self {
        BackendKind::Cache {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub kind: BackendKind,
    /// Directory for backing files (default: the system temp dir).
    pub temp_dir: Option<PathBuf>,
    /// Source of key material for encrypted disk stores.
    pub rng: SharedRng,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            temp_dir: None,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }
}

impl StoreConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Deterministic key material, for tests.
    pub fn seeded(kind: BackendKind, seed: u64) -> Self {
        Self {
            kind,
            temp_dir: None,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }
}

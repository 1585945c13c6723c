use dashmap::DashMap;

use crate::error::Result;
use crate::record_store::{RecordStore, RecordVisitor, StoreKind};

/// Unbounded in-memory store.
///
/// Both maps are concurrent so a reader thread can look records up while the owning
/// table is still being populated.
#[derive(Debug, Default)]
pub struct MapStore {
    records: DashMap<u32, String>,
    keys: DashMap<String, u32>,
}

impl MapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MapStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Map
    }

    fn put(&self, index: u32, record: &str) -> Result<()> {
        self.records.insert(index, record.to_string());
        Ok(())
    }

    fn get(&self, index: u32) -> Result<Option<String>> {
        Ok(self.records.get(&index).map(|entry| entry.value().clone()))
    }

    fn remove(&self, index: u32) -> Result<bool> {
        Ok(self.records.remove(&index).is_some())
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn supports_key_lookup(&self) -> bool {
        true
    }

    fn find_key(&self, key: &str) -> Result<Option<u32>> {
        Ok(self.keys.get(key).map(|entry| *entry.value()))
    }

    fn put_key(&self, key: &str, index: u32) -> Result<()> {
        self.keys.insert(key.to_string(), index);
        Ok(())
    }

    fn visit_in_order(&self, visitor: &mut RecordVisitor<'_>) -> Result<()> {
        let mut indices: Vec<u32> = self.records.iter().map(|entry| *entry.key()).collect();
        indices.sort_unstable();
        for index in indices {
            // Clone out of the shard guard before calling back into user code.
            let Some(record) = self.records.get(&index).map(|e| e.value().clone()) else {
                continue;
            };
            visitor(index, &record)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.records.clear();
        self.keys.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visits_records_in_index_order() {
        let store = MapStore::new();
        for (idx, text) in [(2u32, "c"), (0, "a"), (1, "b")] {
            store.put(idx, text).expect("put");
        }

        let mut seen = Vec::new();
        store
            .visit_in_order(&mut |idx, record| {
                seen.push((idx, record.to_string()));
                Ok(())
            })
            .expect("visit");
        assert_eq!(
            seen,
            vec![(0, "a".to_string()), (1, "b".to_string()), (2, "c".to_string())]
        );
    }

    #[test]
    fn remove_reports_presence() {
        let store = MapStore::new();
        store.put(0, "x").expect("put");
        assert!(store.remove(0).expect("remove"));
        assert!(!store.remove(0).expect("remove again"));
        assert_eq!(store.get(0).expect("get"), None);
    }
}

//! In-memory inventory store
//!
//! Records every persisted inventory so tests can assert exactly how many
//! times, and with what contents, a round persisted. Can be switched into a
//! failing mode to exercise the persist-error path.

use super::{InventoryRecord, InventoryStore, PersistError};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Vec<InventoryRecord>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent persist with `reason`
    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }

    /// Accept persists again
    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Every record accepted so far
    pub fn records(&self) -> Vec<InventoryRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn persist_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<InventoryRecord> {
        self.records.lock().unwrap().last().cloned()
    }
}

impl InventoryStore for MemoryStore {
    fn persist(&self, record: &InventoryRecord) -> Result<(), PersistError> {
        if let Some(reason) = self.failure.lock().unwrap().as_ref() {
            return Err(PersistError::Rejected(reason.clone()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ItemMap;

    #[test]
    fn test_memory_store_records_in_order() {
        let store = MemoryStore::new();
        store.persist(&InventoryRecord::new(0, ItemMap::new())).unwrap();
        store.persist(&InventoryRecord::new(1, ItemMap::new())).unwrap();

        let generations: Vec<_> = store.records().iter().map(|r| r.generation).collect();
        assert_eq!(generations, vec![0, 1]);
        assert_eq!(store.last().unwrap().generation, 1);
    }

    #[test]
    fn test_memory_store_failure_mode() {
        let store = MemoryStore::new();
        store.fail_with("disk full");

        let err = store.persist(&InventoryRecord::new(0, ItemMap::new())).unwrap_err();
        assert_eq!(err.to_string(), "store rejected inventory record: disk full");
        assert_eq!(store.persist_count(), 0);

        store.recover();
        store.persist(&InventoryRecord::new(0, ItemMap::new())).unwrap();
        assert_eq!(store.persist_count(), 1);
    }
}

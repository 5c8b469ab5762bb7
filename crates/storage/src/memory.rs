use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::StorageError;
use crate::traits::PreferenceStore;

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_stops_at_prefix_boundary() -> Result<(), StorageError> {
        let store = MemoryPreferenceStore::new();
        store.set("sandbox:ledger:a", "1")?;
        store.set("sandbox:ledger:b", "2")?;
        store.set("sandbox:other", "3")?;
        store.set("theme", "dark")?;

        let keys = store.keys_with_prefix("sandbox:ledger:")?;
        assert_eq!(keys, vec!["sandbox:ledger:a", "sandbox:ledger:b"]);

        store.remove("sandbox:ledger:a")?;
        assert_eq!(store.get("sandbox:ledger:a")?, None);
        assert_eq!(store.len(), 3);
        Ok(())
    }
}

//! In-memory persistence storage
//!
//! Clones share one map, so a test can keep a handle while the store writes
//! through another. The map is behind a lock and can be handed to other
//! threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use accord_core::{AccordError, AccordResult, Storage};
use parking_lot::RwLock;

/// Shared in-memory key-value storage
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    /// Raw stored string
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    /// Seed a raw entry, bypassing failure injection
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries.write().insert(key.to_string(), value.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Make every subsequent write fail like a full quota
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> AccordResult<Option<String>> {
        Ok(self.raw(key))
    }

    fn set_item(&self, key: &str, value: &str) -> AccordResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AccordError::Storage(format!("quota exceeded writing \"{}\"", key)));
        }
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> AccordResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_between_clones() {
        let storage = MemoryStorage::new();
        let other = storage.clone();

        storage.set_item("a", "1").unwrap();
        assert_eq!(other.get_item("a").unwrap().as_deref(), Some("1"));

        other.remove_item("a").unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_failure_injection() {
        let storage = MemoryStorage::new();
        storage.fail_writes(true);
        assert!(matches!(
            storage.set_item("a", "1"),
            Err(AccordError::Storage(_))
        ));
        storage.fail_writes(false);
        storage.set_item("a", "1").unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_usable_across_threads() {
        let storage = MemoryStorage::new();
        let remote = storage.clone();
        std::thread::spawn(move || remote.set_item("k", "v").unwrap())
            .join()
            .unwrap();
        assert_eq!(storage.raw("k").as_deref(), Some("v"));
    }
}

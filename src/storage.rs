//! Local key-value store held by every process.

use crate::types::{Key, KeyRange};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// In-process map from key to value for the range a process owns.
///
/// Migration is driven by a single control flow, but the diagnostic dump reads
/// the map concurrently, so access goes through a mutex.
#[derive(Default)]
pub struct LocalStore {
    data: Mutex<BTreeMap<Key, String>>,
}

impl LocalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store preloaded with entries.
    pub fn with_entries(entries: impl IntoIterator<Item = (Key, String)>) -> Self {
        Self {
            data: Mutex::new(entries.into_iter().collect()),
        }
    }

    /// Insert or overwrite a value. Returns the previous value.
    pub fn insert(&self, key: Key, value: impl Into<String>) -> Option<String> {
        self.data.lock().insert(key, value.into())
    }

    /// Get a copy of a value.
    pub fn get(&self, key: Key) -> Option<String> {
        self.data.lock().get(&key).cloned()
    }

    /// Check if a key is present.
    pub fn contains(&self, key: Key) -> bool {
        self.data.lock().contains_key(&key)
    }

    /// Remove a key, returning its value.
    pub fn remove(&self, key: Key) -> Option<String> {
        self.data.lock().remove(&key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Entries whose key lies in `range`, in key order.
    ///
    /// The entries stay in the store; senders remove each one only after it
    /// has been written to the wire.
    pub fn entries_in(&self, range: KeyRange) -> Vec<(Key, String)> {
        self.data
            .lock()
            .range(range.start..=range.end)
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    /// Point-in-time copy of every entry, in key order.
    pub fn snapshot(&self) -> Vec<(Key, String)> {
        self.data
            .lock()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    /// Render the store as the two-column dump shown by the `data` command.
    pub fn dump(&self) -> String {
        let mut out = String::from("Key:    Val:\n");
        for (key, value) in self.snapshot() {
            out.push_str(&format!("{}  {}\n", key, value));
        }
        out
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("entry_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_overwrites() {
        let store = LocalStore::new();

        assert_eq!(store.insert(5, "a"), None);
        assert_eq!(store.insert(5, "b"), Some("a".to_string()));
        assert_eq!(store.get(5), Some("b".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_entries_in_range_is_inclusive() {
        let store = LocalStore::with_entries([
            (0, "zero".to_string()),
            (200, "two hundred".to_string()),
            (201, "next".to_string()),
            (1023, "last".to_string()),
        ]);

        let entries = store.entries_in(KeyRange::new(0, 200).unwrap());
        assert_eq!(
            entries,
            vec![(0, "zero".to_string()), (200, "two hundred".to_string())]
        );
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_remove_and_dump() {
        let store = LocalStore::with_entries([(5, "a".to_string()), (900, "b".to_string())]);

        assert_eq!(store.remove(5), Some("a".to_string()));
        assert!(!store.contains(5));
        assert_eq!(store.dump(), "Key:    Val:\n900  b\n");
    }
}

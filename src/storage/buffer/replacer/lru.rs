use std::hash::Hash;

use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

/// LRU victim set used by the buffer pool for page replacement.
///
/// The ordered map keeps the least recently inserted or touched value at
/// the front, so every operation is O(1). All operations serialize on one
/// mutex.
pub struct LruReplacer<T: Hash + Eq + Clone> {
    entries: Mutex<LinkedHashMap<T, ()>>,
}

impl<T: Hash + Eq + Clone> LruReplacer<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LinkedHashMap::new()),
        }
    }

    /// Record `value` as most recently used, inserting it if absent
    pub fn insert(&self, value: T) {
        let mut entries = self.entries.lock();
        if entries.get_refresh(&value).is_none() {
            entries.insert(value, ());
        }
    }

    /// Remove and return the least recently used value
    pub fn victim(&self) -> Option<T> {
        self.entries.lock().pop_front().map(|(value, _)| value)
    }

    /// Remove `value` from the set; returns false if it was not present
    pub fn erase(&self, value: &T) -> bool {
        self.entries.lock().remove(value).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T: Hash + Eq + Clone> Default for LruReplacer<T> {
    fn default() -> Self {
        Self::new()
    }
}

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

/// Extendible hash directory used as the buffer pool's page table.
///
/// The directory holds 2^global_depth slots, each referring to a bucket
/// with its own local depth. Buckets live in a slab and the directory
/// stores slab indices, so several slots can alias one bucket. All
/// operations serialize on a single mutex. Removal never shrinks the
/// directory.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    inner: Mutex<Directory<K, V>>,
}

struct Directory<K, V> {
    global_depth: usize,
    /// Directory slot -> slab index
    slots: Vec<usize>,
    /// Bucket slab; split buckets leave a vacant slot behind
    buckets: Vec<Option<Bucket<K, V>>>,
    num_buckets: usize,
}

struct Bucket<K, V> {
    local_depth: usize,
    items: Vec<(K, V)>,
}

impl<K: Hash + Eq + Clone, V: Clone> ExtendibleHashTable<K, V> {
    /// Create a table whose buckets hold at most `bucket_size` entries
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0);
        Self {
            bucket_size,
            inner: Mutex::new(Directory {
                global_depth: 0,
                slots: vec![0],
                buckets: vec![Some(Bucket {
                    local_depth: 0,
                    items: Vec::new(),
                })],
                num_buckets: 1,
            }),
        }
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let bucket = inner.bucket_for(hash_key(key));
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let bucket = inner.bucket_for_mut(hash_key(key));
        let before = bucket.items.len();
        bucket.items.retain(|(k, _)| k != key);
        bucket.items.len() != before
    }

    /// Insert `key -> value`, splitting the target bucket (and doubling the
    /// directory when its local depth has caught up with the global depth)
    /// until the entry fits.
    pub fn insert(&self, key: K, value: V) {
        let hash = hash_key(&key);
        let mut inner = self.inner.lock();

        loop {
            let bucket = inner.bucket_for_mut(hash);
            if let Some(item) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                item.1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }
            inner.split_bucket(hash);
        }
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket referenced by directory slot `index`
    pub fn local_depth(&self, index: usize) -> usize {
        let inner = self.inner.lock();
        let slab_index = inner.slots[index];
        inner.buckets[slab_index]
            .as_ref()
            .map(|b| b.local_depth)
            .unwrap_or(0)
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }

    /// Total number of stored entries
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .buckets
            .iter()
            .flatten()
            .map(|b| b.items.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Hash + Eq + Clone, V: Clone> Directory<K, V> {
    fn slot_index(&self, hash: u64) -> usize {
        (hash as usize) & ((1 << self.global_depth) - 1)
    }

    fn bucket_for(&self, hash: u64) -> &Bucket<K, V> {
        let slab_index = self.slots[self.slot_index(hash)];
        self.buckets[slab_index]
            .as_ref()
            .expect("directory slot refers to a vacated bucket")
    }

    fn bucket_for_mut(&mut self, hash: u64) -> &mut Bucket<K, V> {
        let slab_index = self.slots[self.slot_index(hash)];
        self.buckets[slab_index]
            .as_mut()
            .expect("directory slot refers to a vacated bucket")
    }

    /// Split the bucket that `hash` maps to, redistributing its entries by
    /// the newly discriminating bit and rewriting every aliased slot.
    fn split_bucket(&mut self, hash: u64) {
        let old_index = self.slots[self.slot_index(hash)];
        let local_depth = self.buckets[old_index]
            .as_ref()
            .expect("directory slot refers to a vacated bucket")
            .local_depth;

        // Directory doubles once the bucket is as deep as the directory.
        if local_depth == self.global_depth {
            let len = self.slots.len();
            for i in 0..len {
                self.slots.push(self.slots[i]);
            }
            self.global_depth += 1;
        }

        let mask: u64 = 1 << local_depth;
        let old_bucket = self.buckets[old_index]
            .take()
            .expect("directory slot refers to a vacated bucket");

        let mut low = Bucket {
            local_depth: local_depth + 1,
            items: Vec::new(),
        };
        let mut high = Bucket {
            local_depth: local_depth + 1,
            items: Vec::new(),
        };
        for (k, v) in old_bucket.items {
            if hash_key(&k) & mask != 0 {
                high.items.push((k, v));
            } else {
                low.items.push((k, v));
            }
        }

        let low_index = self.buckets.len();
        self.buckets.push(Some(low));
        let high_index = self.buckets.len();
        self.buckets.push(Some(high));
        self.num_buckets += 1;

        for i in 0..self.slots.len() {
            if self.slots[i] == old_index {
                self.slots[i] = if (i as u64) & mask != 0 {
                    high_index
                } else {
                    low_index
                };
            }
        }
    }
}

fn hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find_remove() {
        let table = ExtendibleHashTable::new(4);
        table.insert(1, "a");
        table.insert(2, "b");

        assert_eq!(table.find(&1), Some("a"));
        assert_eq!(table.find(&2), Some("b"));
        assert_eq!(table.find(&3), None);

        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_overwrites_existing_key() {
        let table = ExtendibleHashTable::new(2);
        table.insert(1, 10);
        table.insert(1, 20);
        assert_eq!(table.find(&1), Some(20));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_split_keeps_all_keys_findable() {
        let table = ExtendibleHashTable::new(2);
        for i in 0..64 {
            table.insert(i, i * 10);
        }
        for i in 0..64 {
            assert_eq!(table.find(&i), Some(i * 10), "key {} lost after splits", i);
        }
        assert!(table.global_depth() >= 2);
        assert!(table.num_buckets() >= 4);
        assert_eq!(table.len(), 64);
    }

    #[test]
    fn test_local_depth_bounded_by_global() {
        let table = ExtendibleHashTable::new(2);
        for i in 0..128 {
            table.insert(i, i);
        }
        let global = table.global_depth();
        for slot in 0..(1 << global) {
            assert!(table.local_depth(slot) <= global);
        }
    }
}

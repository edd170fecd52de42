use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, INVALID_LSN};
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::tree_page::{self, INTERNAL_PAGE, TREE_PAGE_HEADER_SIZE};

// Internal page body: a packed array of (key, child page id) entries.
// The key in slot 0 is unused; searches start at slot 1. `size` counts
// entries, i.e. children.

fn entry_size<K: IndexKey>() -> usize {
    K::ENCODED_LEN + 4
}

fn entry_offset<K: IndexKey>(index: usize) -> usize {
    TREE_PAGE_HEADER_SIZE + index * entry_size::<K>()
}

/// Read-only view of an internal page
pub struct InternalRef<'a, K: IndexKey> {
    data: &'a [u8],
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalRef<'a, K> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert!(!tree_page::is_leaf(data));
        Self {
            data,
            _key: PhantomData,
        }
    }

    pub fn page_id(&self) -> PageId {
        tree_page::page_id(self.data)
    }

    pub fn parent_page_id(&self) -> PageId {
        tree_page::parent_page_id(self.data)
    }

    pub fn size(&self) -> usize {
        tree_page::size(self.data)
    }

    pub fn max_size(&self) -> usize {
        tree_page::max_size(self.data)
    }

    pub fn min_size(&self) -> usize {
        tree_page::min_size(self.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        K::decode_from(&self.data[entry_offset::<K>(index)..])
    }

    pub fn value_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        let off = entry_offset::<K>(index) + K::ENCODED_LEN;
        LittleEndian::read_i32(&self.data[off..off + 4])
    }

    /// Index of the entry whose child is `page_id`
    pub fn value_index(&self, page_id: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == page_id)
    }

    /// Child to follow for `key`: binary search over slots [1, size) for
    /// the smallest separator strictly greater than `key`, then take the
    /// child to its left.
    pub fn lookup(&self, key: &K) -> PageId {
        let mut lo = 1;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) <= *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.value_at(lo - 1)
    }
}

/// Mutable view of an internal page
pub struct InternalMut<'a, K: IndexKey> {
    data: &'a mut [u8],
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalMut<'a, K> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self {
            data,
            _key: PhantomData,
        }
    }

    pub fn as_read(&self) -> InternalRef<'_, K> {
        InternalRef::new(self.data)
    }

    /// Format a fresh internal page
    pub fn init(&mut self, page_id: PageId, parent_page_id: PageId, max_size: usize) {
        tree_page::set_page_type(self.data, INTERNAL_PAGE);
        tree_page::set_lsn(self.data, INVALID_LSN);
        tree_page::set_size(self.data, 0);
        tree_page::set_max_size(self.data, max_size);
        tree_page::set_parent_page_id(self.data, parent_page_id);
        tree_page::set_page_id(self.data, page_id);
    }

    pub fn page_id(&self) -> PageId {
        tree_page::page_id(self.data)
    }

    pub fn parent_page_id(&self) -> PageId {
        tree_page::parent_page_id(self.data)
    }

    pub fn size(&self) -> usize {
        tree_page::size(self.data)
    }

    pub fn max_size(&self) -> usize {
        tree_page::max_size(self.data)
    }

    pub fn set_size(&mut self, size: usize) {
        tree_page::set_size(self.data, size);
    }

    pub fn key_at(&self, index: usize) -> K {
        self.as_read().key_at(index)
    }

    pub fn value_at(&self, index: usize) -> PageId {
        self.as_read().value_at(index)
    }

    pub fn value_index(&self, page_id: PageId) -> Option<usize> {
        self.as_read().value_index(page_id)
    }

    /// (key, child) at `index`; the key of entry 0 is meaningless
    pub fn entry(&self, index: usize) -> (K, PageId) {
        (self.key_at(index), self.value_at(index))
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        debug_assert!(index >= 1 && index < self.size());
        key.encode_into(&mut self.data[entry_offset::<K>(index)..]);
    }

    pub fn set_value_at(&mut self, index: usize, page_id: PageId) {
        debug_assert!(index < self.size());
        let off = entry_offset::<K>(index) + K::ENCODED_LEN;
        LittleEndian::write_i32(&mut self.data[off..off + 4], page_id);
    }

    fn write_entry(&mut self, index: usize, key: &K, page_id: PageId) {
        let off = entry_offset::<K>(index);
        key.encode_into(&mut self.data[off..]);
        LittleEndian::write_i32(
            &mut self.data[off + K::ENCODED_LEN..off + K::ENCODED_LEN + 4],
            page_id,
        );
    }

    /// Fill slots 0 and 1 of a brand-new root: the old root on the left,
    /// the split-off sibling on the right, `key` separating them.
    pub fn populate_new_root(&mut self, left: PageId, key: &K, right: PageId) {
        debug_assert_eq!(self.size(), 0);
        self.set_size(2);
        self.write_entry(0, key, left);
        self.write_entry(1, key, right);
    }

    /// Insert (key, child) immediately after the entry whose child is
    /// `old_child`. Returns the new size.
    pub fn insert_after(&mut self, old_child: PageId, key: &K, new_child: PageId) -> usize {
        let index = self
            .value_index(old_child)
            .expect("split child missing from its parent");
        self.insert_entry_at(index + 1, key, new_child);
        self.size()
    }

    pub fn push_entry(&mut self, key: &K, page_id: PageId) {
        let size = self.size();
        self.set_size(size + 1);
        self.write_entry(size, key, page_id);
    }

    pub fn insert_entry_at(&mut self, index: usize, key: &K, page_id: PageId) {
        let size = self.size();
        debug_assert!(index <= size);
        let start = entry_offset::<K>(index);
        let end = entry_offset::<K>(size);
        self.data.copy_within(start..end, start + entry_size::<K>());
        self.set_size(size + 1);
        self.write_entry(index, key, page_id);
    }

    /// Remove the entry at `index`, keeping the array packed
    pub fn remove_entry(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);
        let start = entry_offset::<K>(index + 1);
        let end = entry_offset::<K>(size);
        self.data
            .copy_within(start..end, entry_offset::<K>(index));
        self.set_size(size - 1);
    }
}

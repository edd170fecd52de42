use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, Rid, INVALID_LSN, INVALID_PAGE_ID};
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::tree_page::{
    self, LEAF_PAGE, LEAF_PAGE_HEADER_SIZE, OFFSET_NEXT, OFFSET_PREV,
};

// Leaf page body: a packed, key-ordered array of (key, RID) items plus
// next/prev sibling links in the header.

fn item_size<K: IndexKey>() -> usize {
    K::ENCODED_LEN + Rid::ENCODED_LEN
}

fn item_offset<K: IndexKey>(index: usize) -> usize {
    LEAF_PAGE_HEADER_SIZE + index * item_size::<K>()
}

/// Read-only view of a leaf page
pub struct LeafRef<'a, K: IndexKey> {
    data: &'a [u8],
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> LeafRef<'a, K> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert!(tree_page::is_leaf(data));
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

    pub fn next_page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.data[OFFSET_NEXT..OFFSET_NEXT + 4])
    }

    pub fn prev_page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.data[OFFSET_PREV..OFFSET_PREV + 4])
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        K::decode_from(&self.data[item_offset::<K>(index)..])
    }

    pub fn rid_at(&self, index: usize) -> Rid {
        debug_assert!(index < self.size());
        Rid::read_from(&self.data[item_offset::<K>(index) + K::ENCODED_LEN..])
    }

    pub fn item(&self, index: usize) -> (K, Rid) {
        (self.key_at(index), self.rid_at(index))
    }

    /// Index of the first item with key >= `key` (== size when past all)
    pub fn key_index(&self, key: &K) -> usize {
        let mut lo = 0;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) < *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn lookup(&self, key: &K) -> Option<Rid> {
        let index = self.key_index(key);
        if index < self.size() && self.key_at(index) == *key {
            Some(self.rid_at(index))
        } else {
            None
        }
    }
}

/// Mutable view of a leaf page
pub struct LeafMut<'a, K: IndexKey> {
    data: &'a mut [u8],
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> LeafMut<'a, K> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self {
            data,
            _key: PhantomData,
        }
    }

    pub fn as_read(&self) -> LeafRef<'_, K> {
        LeafRef::new(self.data)
    }

    /// Format a fresh leaf page
    pub fn init(&mut self, page_id: PageId, parent_page_id: PageId, max_size: usize) {
        tree_page::set_page_type(self.data, LEAF_PAGE);
        tree_page::set_lsn(self.data, INVALID_LSN);
        tree_page::set_size(self.data, 0);
        tree_page::set_max_size(self.data, max_size);
        tree_page::set_parent_page_id(self.data, parent_page_id);
        tree_page::set_page_id(self.data, page_id);
        self.set_next_page_id(INVALID_PAGE_ID);
        self.set_prev_page_id(INVALID_PAGE_ID);
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

    pub fn set_size(&mut self, size: usize) {
        tree_page::set_size(self.data, size);
    }

    pub fn next_page_id(&self) -> PageId {
        self.as_read().next_page_id()
    }

    pub fn prev_page_id(&self) -> PageId {
        self.as_read().prev_page_id()
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        LittleEndian::write_i32(&mut self.data[OFFSET_NEXT..OFFSET_NEXT + 4], page_id);
    }

    pub fn set_prev_page_id(&mut self, page_id: PageId) {
        LittleEndian::write_i32(&mut self.data[OFFSET_PREV..OFFSET_PREV + 4], page_id);
    }

    pub fn key_at(&self, index: usize) -> K {
        self.as_read().key_at(index)
    }

    pub fn item(&self, index: usize) -> (K, Rid) {
        self.as_read().item(index)
    }

    pub fn lookup(&self, key: &K) -> Option<Rid> {
        self.as_read().lookup(key)
    }

    fn write_item(&mut self, index: usize, key: &K, rid: Rid) {
        let off = item_offset::<K>(index);
        key.encode_into(&mut self.data[off..]);
        rid.write_to(&mut self.data[off + K::ENCODED_LEN..]);
    }

    /// Insert in key order; the caller has already ruled out duplicates.
    /// Returns the new size.
    pub fn insert(&mut self, key: &K, rid: Rid) -> usize {
        let index = self.as_read().key_index(key);
        self.insert_item_at(index, key, rid);
        self.size()
    }

    /// Remove `key` if present, returning the new size
    pub fn remove(&mut self, key: &K) -> Option<usize> {
        let index = self.as_read().key_index(key);
        if index >= self.size() || self.key_at(index) != *key {
            return None;
        }
        self.remove_item_at(index);
        Some(self.size())
    }

    pub fn push_item(&mut self, key: &K, rid: Rid) {
        let size = self.size();
        self.set_size(size + 1);
        self.write_item(size, key, rid);
    }

    pub fn insert_item_at(&mut self, index: usize, key: &K, rid: Rid) {
        let size = self.size();
        debug_assert!(index <= size);
        let start = item_offset::<K>(index);
        let end = item_offset::<K>(size);
        self.data.copy_within(start..end, start + item_size::<K>());
        self.set_size(size + 1);
        self.write_item(index, key, rid);
    }

    pub fn remove_item_at(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);
        let start = item_offset::<K>(index + 1);
        let end = item_offset::<K>(size);
        self.data.copy_within(start..end, item_offset::<K>(index));
        self.set_size(size - 1);
    }
}

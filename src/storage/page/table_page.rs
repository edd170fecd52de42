use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, Rid, INVALID_LSN, INVALID_PAGE_ID, PAGE_SIZE};

/// A tuple payload. The engine treats tuple contents as opaque bytes; only
/// the size/offset bookkeeping lives in the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// On-disk/on-log form: 4-byte length prefix followed by the bytes
    pub fn encoded_len(&self) -> usize {
        4 + self.data.len()
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.data.len() as u32);
        buf[4..4 + self.data.len()].copy_from_slice(&self.data);
    }

    pub fn read_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < 4 {
            return None;
        }
        let len = LittleEndian::read_u32(&buf[0..4]) as usize;
        if buf.len() < 4 + len {
            return None;
        }
        Some(Self {
            data: buf[4..4 + len].to_vec(),
        })
    }
}

// Slotted page layout:
//   page_id(4) lsn(4) prev_page_id(4) next_page_id(4)
//   free_space_pointer(4) tuple_count(4)
//   slot array [(offset u32, size u32)] growing up from the header,
//   tuple bytes growing down from the end of the page.
const OFFSET_PAGE_ID: usize = 0;
const OFFSET_PREV: usize = 8;
const OFFSET_NEXT: usize = 12;
const OFFSET_FREE_PTR: usize = 16;
const OFFSET_COUNT: usize = 20;
const HEADER_SIZE: usize = 24;
const SLOT_SIZE: usize = 8;

/// Delete mark stored in the slot's size field
const DELETE_MASK: u32 = 1 << 31;

/// Slotted tuple page view. This is the page type WAL recovery replays
/// onto: inserts, updates, and the three delete flavors all target a
/// (page, slot) RID.
pub struct TablePage<'a> {
    page: &'a mut Page,
}

impl<'a> TablePage<'a> {
    pub fn new(page: &'a mut Page) -> Self {
        Self { page }
    }

    /// Format the page as an empty table page
    pub fn init(&mut self, page_id: PageId, prev_page_id: PageId) {
        self.page.data[..HEADER_SIZE].fill(0);
        LittleEndian::write_i32(
            &mut self.page.data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4],
            page_id,
        );
        self.page.set_lsn(INVALID_LSN);
        self.set_prev_page_id(prev_page_id);
        self.set_next_page_id(INVALID_PAGE_ID);
        self.set_free_space_pointer(PAGE_SIZE as u32);
        self.set_tuple_count(0);
    }

    pub fn page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.page.data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4])
    }

    pub fn prev_page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.page.data[OFFSET_PREV..OFFSET_PREV + 4])
    }

    pub fn next_page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.page.data[OFFSET_NEXT..OFFSET_NEXT + 4])
    }

    pub fn set_prev_page_id(&mut self, page_id: PageId) {
        LittleEndian::write_i32(&mut self.page.data[OFFSET_PREV..OFFSET_PREV + 4], page_id);
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        LittleEndian::write_i32(&mut self.page.data[OFFSET_NEXT..OFFSET_NEXT + 4], page_id);
    }

    pub fn tuple_count(&self) -> usize {
        LittleEndian::read_u32(&self.page.data[OFFSET_COUNT..OFFSET_COUNT + 4]) as usize
    }

    fn set_tuple_count(&mut self, count: usize) {
        LittleEndian::write_u32(
            &mut self.page.data[OFFSET_COUNT..OFFSET_COUNT + 4],
            count as u32,
        );
    }

    fn free_space_pointer(&self) -> u32 {
        LittleEndian::read_u32(&self.page.data[OFFSET_FREE_PTR..OFFSET_FREE_PTR + 4])
    }

    fn set_free_space_pointer(&mut self, ptr: u32) {
        LittleEndian::write_u32(&mut self.page.data[OFFSET_FREE_PTR..OFFSET_FREE_PTR + 4], ptr);
    }

    fn slot_offset(slot: u32) -> usize {
        HEADER_SIZE + slot as usize * SLOT_SIZE
    }

    fn slot(&self, slot: u32) -> (u32, u32) {
        let off = Self::slot_offset(slot);
        (
            LittleEndian::read_u32(&self.page.data[off..off + 4]),
            LittleEndian::read_u32(&self.page.data[off + 4..off + 8]),
        )
    }

    fn set_slot(&mut self, slot: u32, offset: u32, size: u32) {
        let off = Self::slot_offset(slot);
        LittleEndian::write_u32(&mut self.page.data[off..off + 4], offset);
        LittleEndian::write_u32(&mut self.page.data[off + 4..off + 8], size);
    }

    fn free_space(&self) -> usize {
        let slots_end = Self::slot_offset(self.tuple_count() as u32);
        self.free_space_pointer() as usize - slots_end
    }

    /// Store `tuple` at the slot named by `rid`, extending the slot array
    /// if needed. Returns false when the page cannot hold the tuple or the
    /// slot is already occupied.
    pub fn insert_tuple(&mut self, rid: Rid, tuple: &Tuple) -> bool {
        let slot = rid.slot;
        let count = self.tuple_count() as u32;

        let new_slots = (slot + 1).saturating_sub(count) as usize;
        let needed = new_slots * SLOT_SIZE + tuple.len();
        if needed > self.free_space() {
            return false;
        }

        if slot < count {
            let (_, size) = self.slot(slot);
            if size != 0 {
                return false;
            }
        } else {
            for s in count..=slot {
                self.set_slot(s, 0, 0);
            }
            self.set_tuple_count(slot as usize + 1);
        }

        let new_free = self.free_space_pointer() - tuple.len() as u32;
        self.page.data[new_free as usize..new_free as usize + tuple.len()]
            .copy_from_slice(tuple.as_slice());
        self.set_free_space_pointer(new_free);
        self.set_slot(slot, new_free, tuple.len() as u32);
        true
    }

    /// Fetch the tuple at `rid`; deleted and vacant slots return None
    pub fn get_tuple(&self, rid: Rid) -> Option<Tuple> {
        if rid.slot as usize >= self.tuple_count() {
            return None;
        }
        let (offset, size) = self.slot(rid.slot);
        if size == 0 || size & DELETE_MASK != 0 {
            return None;
        }
        Some(Tuple::from_slice(
            &self.page.data[offset as usize..offset as usize + size as usize],
        ))
    }

    /// Replace the tuple at `rid` with `new_tuple`. Same-size updates are
    /// done in place; growing updates allocate fresh space from the free
    /// region.
    pub fn update_tuple(&mut self, rid: Rid, new_tuple: &Tuple) -> bool {
        if rid.slot as usize >= self.tuple_count() {
            return false;
        }
        let (offset, size) = self.slot(rid.slot);
        if size == 0 || size & DELETE_MASK != 0 {
            return false;
        }

        if size as usize == new_tuple.len() {
            self.page.data[offset as usize..offset as usize + new_tuple.len()]
                .copy_from_slice(new_tuple.as_slice());
            return true;
        }

        if new_tuple.len() > self.free_space() {
            return false;
        }
        let new_free = self.free_space_pointer() - new_tuple.len() as u32;
        self.page.data[new_free as usize..new_free as usize + new_tuple.len()]
            .copy_from_slice(new_tuple.as_slice());
        self.set_free_space_pointer(new_free);
        self.set_slot(rid.slot, new_free, new_tuple.len() as u32);
        true
    }

    /// Set the delete mark on a tuple (two-phase delete, first half)
    pub fn mark_delete(&mut self, rid: Rid) -> bool {
        if rid.slot as usize >= self.tuple_count() {
            return false;
        }
        let (offset, size) = self.slot(rid.slot);
        if size == 0 || size & DELETE_MASK != 0 {
            return false;
        }
        self.set_slot(rid.slot, offset, size | DELETE_MASK);
        true
    }

    /// Clear the delete mark on a tuple
    pub fn rollback_delete(&mut self, rid: Rid) -> bool {
        if rid.slot as usize >= self.tuple_count() {
            return false;
        }
        let (offset, size) = self.slot(rid.slot);
        if size == 0 {
            return false;
        }
        self.set_slot(rid.slot, offset, size & !DELETE_MASK);
        true
    }

    /// Remove the tuple for good. The slot stays vacant; space compaction
    /// is out of scope. Deleting a vacant slot is a no-op so undo passes
    /// stay idempotent.
    pub fn apply_delete(&mut self, rid: Rid) -> bool {
        if rid.slot as usize >= self.tuple_count() {
            return false;
        }
        let (_, size) = self.slot(rid.slot);
        if size == 0 {
            return false;
        }
        self.set_slot(rid.slot, 0, 0);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page() -> Page {
        let mut page = Page::new(5);
        TablePage::new(&mut page).init(5, INVALID_PAGE_ID);
        page
    }

    #[test]
    fn test_insert_and_get() {
        let mut page = fresh_page();
        let mut view = TablePage::new(&mut page);
        let rid = Rid::new(5, 0);
        let tuple = Tuple::from_slice(b"hello");

        assert!(view.insert_tuple(rid, &tuple));
        assert_eq!(view.get_tuple(rid), Some(tuple));
        assert_eq!(view.get_tuple(Rid::new(5, 1)), None);
    }

    #[test]
    fn test_insert_into_occupied_slot_fails() {
        let mut page = fresh_page();
        let mut view = TablePage::new(&mut page);
        let rid = Rid::new(5, 2);

        assert!(view.insert_tuple(rid, &Tuple::from_slice(b"a")));
        assert!(!view.insert_tuple(rid, &Tuple::from_slice(b"b")));
        assert_eq!(view.tuple_count(), 3);
    }

    #[test]
    fn test_update_changes_content() {
        let mut page = fresh_page();
        let mut view = TablePage::new(&mut page);
        let rid = Rid::new(5, 0);

        view.insert_tuple(rid, &Tuple::from_slice(b"old"));
        assert!(view.update_tuple(rid, &Tuple::from_slice(b"new")));
        assert_eq!(view.get_tuple(rid).unwrap().as_slice(), b"new");

        assert!(view.update_tuple(rid, &Tuple::from_slice(b"longer value")));
        assert_eq!(view.get_tuple(rid).unwrap().as_slice(), b"longer value");
    }

    #[test]
    fn test_delete_lifecycle() {
        let mut page = fresh_page();
        let mut view = TablePage::new(&mut page);
        let rid = Rid::new(5, 0);
        let tuple = Tuple::from_slice(b"t");

        view.insert_tuple(rid, &tuple);
        assert!(view.mark_delete(rid));
        assert_eq!(view.get_tuple(rid), None);

        assert!(view.rollback_delete(rid));
        assert_eq!(view.get_tuple(rid), Some(tuple));

        assert!(view.mark_delete(rid));
        assert!(view.apply_delete(rid));
        assert_eq!(view.get_tuple(rid), None);
        // A second apply is a no-op
        assert!(!view.apply_delete(rid));
    }
}

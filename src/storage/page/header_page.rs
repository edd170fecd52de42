use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, INVALID_LSN, PAGE_SIZE};

// Header page layout (page 0):
//   reserved(4) lsn(4) record_count(4)
//   records of [name (32 bytes, NUL padded)][root_page_id (4)]
const OFFSET_COUNT: usize = 8;
const RECORDS_START: usize = 12;
const NAME_LEN: usize = 32;
const RECORD_SIZE: usize = NAME_LEN + 4;

/// View over page 0, which maps index names to their root page IDs.
pub struct HeaderPage<'a> {
    page: &'a mut Page,
}

impl<'a> HeaderPage<'a> {
    pub fn new(page: &'a mut Page) -> Self {
        Self { page }
    }

    pub fn init(&mut self) {
        self.page.data[..RECORDS_START].fill(0);
        self.page.set_lsn(INVALID_LSN);
    }

    /// Format the page if it is still in its all-zero on-disk state
    pub fn ensure_init(&mut self) {
        if self.page.data[..RECORDS_START].iter().all(|&b| b == 0) {
            self.init();
        }
    }

    pub fn record_count(&self) -> usize {
        LittleEndian::read_u32(&self.page.data[OFFSET_COUNT..OFFSET_COUNT + 4]) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        LittleEndian::write_u32(
            &mut self.page.data[OFFSET_COUNT..OFFSET_COUNT + 4],
            count as u32,
        );
    }

    fn max_records() -> usize {
        (PAGE_SIZE - RECORDS_START) / RECORD_SIZE
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_START + index * RECORD_SIZE
    }

    fn name_at(&self, index: usize) -> &str {
        let off = Self::record_offset(index);
        let raw = &self.page.data[off..off + NAME_LEN];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        std::str::from_utf8(&raw[..end]).unwrap_or("")
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.name_at(i) == name)
    }

    /// Register a new index; fails if the name exists, is too long, or the
    /// page is full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if name.len() >= NAME_LEN || self.find_record(name).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= Self::max_records() {
            return false;
        }

        let off = Self::record_offset(count);
        self.page.data[off..off + NAME_LEN].fill(0);
        self.page.data[off..off + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_i32(
            &mut self.page.data[off + NAME_LEN..off + RECORD_SIZE],
            root_page_id,
        );
        self.set_record_count(count + 1);
        true
    }

    /// Update the root page of an existing index
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match self.find_record(name) {
            Some(index) => {
                let off = Self::record_offset(index);
                LittleEndian::write_i32(
                    &mut self.page.data[off + NAME_LEN..off + RECORD_SIZE],
                    root_page_id,
                );
                true
            }
            None => false,
        }
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find_record(name).map(|index| {
            let off = Self::record_offset(index);
            LittleEndian::read_i32(&self.page.data[off + NAME_LEN..off + RECORD_SIZE])
        })
    }

    /// Drop an index registration, compacting the record array
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(index) = self.find_record(name) else {
            return false;
        };
        let count = self.record_count();
        for i in index..count - 1 {
            let src = Self::record_offset(i + 1);
            let dst = Self::record_offset(i);
            let record: [u8; RECORD_SIZE] =
                self.page.data[src..src + RECORD_SIZE].try_into().unwrap();
            self.page.data[dst..dst + RECORD_SIZE].copy_from_slice(&record);
        }
        self.set_record_count(count - 1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::HEADER_PAGE_ID;

    #[test]
    fn test_insert_get_update() {
        let mut page = Page::new(HEADER_PAGE_ID);
        let mut header = HeaderPage::new(&mut page);
        header.init();

        assert!(header.insert_record("orders_pk", 3));
        assert!(!header.insert_record("orders_pk", 4));
        assert_eq!(header.get_root_id("orders_pk"), Some(3));
        assert_eq!(header.get_root_id("missing"), None);

        assert!(header.update_record("orders_pk", 7));
        assert_eq!(header.get_root_id("orders_pk"), Some(7));
        assert!(!header.update_record("missing", 1));
    }

    #[test]
    fn test_delete_compacts() {
        let mut page = Page::new(HEADER_PAGE_ID);
        let mut header = HeaderPage::new(&mut page);
        header.init();

        header.insert_record("a", 1);
        header.insert_record("b", 2);
        header.insert_record("c", 3);

        assert!(header.delete_record("b"));
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_root_id("a"), Some(1));
        assert_eq!(header.get_root_id("c"), Some(3));
        assert_eq!(header.get_root_id("b"), None);
    }

    #[test]
    fn test_ensure_init_only_formats_zero_page() {
        let mut page = Page::new(HEADER_PAGE_ID);
        page.data.fill(0);
        let mut header = HeaderPage::new(&mut page);
        header.ensure_init();
        header.insert_record("idx", 5);

        // A second ensure_init must not wipe existing records.
        let mut header = HeaderPage::new(&mut page);
        header.ensure_init();
        assert_eq!(header.get_root_id("idx"), Some(5));
    }
}

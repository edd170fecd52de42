use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type; -1 denotes an invalid page
pub type PageId = i32;

/// Transaction ID type; a larger ID means a younger transaction
pub type TxnId = i32;

/// LSN (Log Sequence Number) type; -1 denotes an invalid LSN
pub type Lsn = i32;

/// Buffer pool frame ID type
pub type FrameId = usize;

pub const INVALID_PAGE_ID: PageId = -1;
pub const INVALID_LSN: Lsn = -1;
pub const INVALID_TXN_ID: TxnId = -1;

/// Page 0 is reserved for the header page mapping index names to root pages.
pub const HEADER_PAGE_ID: PageId = 0;

/// Record ID: a (page, slot) pair identifying a tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    /// Encoded size of a RID on disk and in the log
    pub const ENCODED_LEN: usize = 8;

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[0..4], self.page_id);
        LittleEndian::write_u32(&mut buf[4..8], self.slot);
    }

    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            page_id: LittleEndian::read_i32(&buf[0..4]),
            slot: LittleEndian::read_u32(&buf[4..8]),
        }
    }
}

/// Page structure
///
/// Every page layout in the engine keeps its LSN at byte offset 4, so the
/// buffer pool can enforce the WAL rule without knowing the page type.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

const LSN_OFFSET: usize = 4;

impl Page {
    pub fn new(page_id: PageId) -> Self {
        let mut page = Self {
            data: [0; PAGE_SIZE],
            page_id,
        };
        page.set_lsn(INVALID_LSN);
        page
    }

    pub fn lsn(&self) -> Lsn {
        LittleEndian::read_i32(&self.data[LSN_OFFSET..LSN_OFFSET + 4])
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        LittleEndian::write_i32(&mut self.data[LSN_OFFSET..LSN_OFFSET + 4], lsn);
    }
}

/// Smart pointer to a page; its RwLock is the page latch
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read guard on a page, usable as a shared latch held across calls
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned write guard on a page, usable as an exclusive latch held across calls
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

/// Buffer pool frame structure
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

/// Smart pointer to a frame
pub type FramePtr = Arc<RwLock<Frame>>;

enum LatchGuard {
    Shared(PageReadGuard),
    Exclusive(PageWriteGuard),
}

/// A page held under a latch, recorded in a transaction's latch set.
///
/// Dropping a `LatchedPage` releases the latch but not the pin; the holder
/// unpins through the buffer pool afterwards.
pub struct LatchedPage {
    page_id: PageId,
    guard: LatchGuard,
}

impl LatchedPage {
    pub fn shared(page: &PagePtr) -> Self {
        let guard = page.read_arc();
        Self {
            page_id: guard.page_id,
            guard: LatchGuard::Shared(guard),
        }
    }

    pub fn exclusive(page: &PagePtr) -> Self {
        let guard = page.write_arc();
        Self {
            page_id: guard.page_id,
            guard: LatchGuard::Exclusive(guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> &Page {
        match &self.guard {
            LatchGuard::Shared(g) => g,
            LatchGuard::Exclusive(g) => g,
        }
    }

    pub fn page_mut(&mut self) -> &mut Page {
        match &mut self.guard {
            LatchGuard::Exclusive(g) => g,
            LatchGuard::Shared(_) => panic!("write access through a shared page latch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_page_has_invalid_lsn() {
        let page = Page::new(3);
        assert_eq!(page.page_id, 3);
        assert_eq!(page.lsn(), INVALID_LSN);
    }

    #[test]
    fn test_rid_round_trip() {
        let rid = Rid::new(7, 42);
        let mut buf = [0u8; Rid::ENCODED_LEN];
        rid.write_to(&mut buf);
        assert_eq!(Rid::read_from(&buf), rid);
    }

    #[test]
    fn test_latched_page_modes() {
        let ptr: PagePtr = Arc::new(RwLock::new(Page::new(9)));
        {
            let latched = LatchedPage::shared(&ptr);
            assert_eq!(latched.page_id(), 9);
            assert_eq!(latched.page().page_id, 9);
        }
        let mut latched = LatchedPage::exclusive(&ptr);
        latched.page_mut().set_lsn(12);
        assert_eq!(latched.page().lsn(), 12);
    }
}

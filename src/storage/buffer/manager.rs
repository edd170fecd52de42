use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::config::LoggingFlag;
use crate::common::types::{Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_LSN, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;
use crate::storage::hash::ExtendibleHashTable;
use crate::wal::log_manager::LogManager;

const PAGE_TABLE_BUCKET_SIZE: usize = 16;

/// Buffer pool: a fixed set of frames caching disk pages.
///
/// The page table is an extendible hash from page ID to frame slot, and
/// eviction candidates come from the LRU replacer. A frame enters the
/// replacer only when its pin count drops to zero and leaves it when the
/// page is re-pinned, so `victim()` never hands back a pinned frame.
pub struct BufferPoolManager {
    /// Serializes frame allocation and page-table transitions; page
    /// contents are protected by the per-page latches, not by this.
    latch: Mutex<()>,
    frames: Vec<FramePtr>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: Mutex<VecDeque<FrameId>>,
    replacer: LruReplacer<FrameId>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
    logging_enabled: Option<LoggingFlag>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::build(pool_size, disk_manager, None)
    }

    /// Build a pool that enforces the WAL rule on dirty write-backs
    pub fn new_with_wal(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self::build(pool_size, disk_manager, Some(log_manager))
    }

    fn build(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            let page = Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        let logging_enabled = log_manager.as_ref().map(|lm| lm.logging_flag());
        Self {
            latch: Mutex::new(()),
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            replacer: LruReplacer::new(),
            disk_manager,
            log_manager,
            logging_enabled,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page, pinning it. The caller must unpin it exactly once.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        let _guard = self.latch.lock();
        if page_id < 0 {
            return Err(BufferPoolError::InvalidOperation(format!(
                "cannot fetch invalid page ID {}",
                page_id
            )));
        }

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id];
            let mut frame_guard = frame.write();
            frame_guard.pin_count += 1;
            self.replacer.erase(&frame_id);
            return Ok(frame_guard.page.clone());
        }

        let frame_id = self.allocate_frame()?;
        let frame = &self.frames[frame_id];

        let mut new_page = Page::new(page_id);
        self.disk_manager.read_page(page_id, &mut new_page)?;

        let mut frame_guard = frame.write();
        {
            let mut page_guard = frame_guard.page.write();
            *page_guard = new_page;
        }
        frame_guard.pin_count = 1;
        frame_guard.is_dirty = false;

        self.page_table.insert(page_id, frame_id);
        Ok(frame_guard.page.clone())
    }

    /// Allocate a fresh page on disk and pin it in a frame
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let _guard = self.latch.lock();
        let page_id = self.disk_manager.allocate_page()?;
        let frame_id = self.allocate_frame()?;
        let frame = &self.frames[frame_id];

        let mut frame_guard = frame.write();
        {
            let mut page_guard = frame_guard.page.write();
            *page_guard = Page::new(page_id);
        }
        frame_guard.pin_count = 1;
        frame_guard.is_dirty = true;

        self.page_table.insert(page_id, frame_id);
        Ok((frame_guard.page.clone(), page_id))
    }

    /// Drop one pin, optionally marking the page dirty. At pin count zero
    /// the frame becomes an eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let _guard = self.latch.lock();
        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        if frame_guard.pin_count > 0 {
            frame_guard.pin_count -= 1;
        }
        if is_dirty {
            frame_guard.is_dirty = true;
        }
        if frame_guard.pin_count == 0 {
            self.replacer.insert(frame_id);
        }
        Ok(())
    }

    /// Write a page back to disk if dirty
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let frame_id = {
            let _guard = self.latch.lock();
            self.page_table
                .find(&page_id)
                .ok_or(BufferPoolError::PageNotFound(page_id))?
        };
        self.flush_frame(frame_id)
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for frame_id in 0..self.frames.len() {
            self.flush_frame(frame_id)?;
        }
        Ok(())
    }

    /// Flush one frame. Runs without the pool latch so it can wait on the
    /// page latch without blocking fetches.
    fn flush_frame(&self, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        if frame_guard.is_dirty {
            let page_copy = frame_guard.page.read().clone();
            self.write_back(&page_copy)?;
            frame_guard.is_dirty = false;
        }
        Ok(())
    }

    /// Drop a page from the pool and release its ID. Fails while pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let _guard = self.latch.lock();
        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id];
            let mut frame_guard = frame.write();
            if frame_guard.pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }

            self.page_table.remove(&page_id);
            {
                let mut page_guard = frame_guard.page.write();
                *page_guard = Page::new(INVALID_PAGE_ID);
            }
            frame_guard.is_dirty = false;

            self.replacer.erase(&frame_id);
            self.free_list.lock().push_back(frame_id);
        }

        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Hand out a frame from the free list, or evict the LRU victim
    fn allocate_frame(&self) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = self.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        let victim_id = self.replacer.victim().ok_or(BufferPoolError::BufferPoolFull)?;
        let frame = &self.frames[victim_id];
        let mut frame_guard = frame.write();
        debug_assert_eq!(frame_guard.pin_count, 0);

        let (old_page_id, dirty_copy) = {
            let page_guard = frame_guard.page.read();
            let copy = if frame_guard.is_dirty {
                Some(page_guard.clone())
            } else {
                None
            };
            (page_guard.page_id, copy)
        };

        if let Some(page) = dirty_copy {
            self.write_back(&page)?;
            frame_guard.is_dirty = false;
        }
        if old_page_id != INVALID_PAGE_ID {
            self.page_table.remove(&old_page_id);
        }

        Ok(victim_id)
    }

    /// WAL rule: the log record for the page's latest change must be
    /// durable before the page itself goes to disk.
    fn write_back(&self, page: &Page) -> Result<(), BufferPoolError> {
        if let (Some(log_manager), Some(flag)) = (&self.log_manager, &self.logging_enabled) {
            let page_lsn = page.lsn();
            if flag.load(Ordering::SeqCst)
                && page_lsn != INVALID_LSN
                && page_lsn > log_manager.persistent_lsn()
            {
                log_manager.flush_until(page_lsn);
            }
        }
        self.disk_manager.write_page(page)?;
        Ok(())
    }
}

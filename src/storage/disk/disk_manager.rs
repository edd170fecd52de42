use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual disk I/O for both the database file and
/// the write-ahead log file.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    next_page_id: AtomicI32,
}

impl DiskManager {
    /// Open (or create) the database at `db_path`; the log file lives next
    /// to it with a `.log` extension.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_path = db_path.as_ref();
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let mut log_path = db_path.to_path_buf();
        log_path.set_extension("log");
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)?;

        // Page 0 is the reserved header page, so allocation starts at 1
        // even for a brand-new file.
        let file_size = db_file.metadata()?.len();
        let next_page_id = ((file_size / PAGE_SIZE as u64) as PageId).max(1);

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            next_page_id: AtomicI32::new(next_page_id),
        })
    }

    /// Read a page from disk. A page beyond the current end of file reads
    /// as a freshly zeroed page, so lazily written pages stay fetchable.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            *page = Page::new(page_id);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut page.data)?;
        page.page_id = page_id;
        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = page.page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;
        Ok(())
    }

    /// Allocate a new page ID
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        Ok(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Release a page ID. Space reclamation is out of scope, so this only
    /// records the request.
    pub fn deallocate_page(&self, page_id: PageId) {
        log::debug!("page {} deallocated", page_id);
    }

    /// Read up to `buf.len()` bytes of the log starting at `offset`.
    /// Returns false when `offset` is at or past the end of the log; bytes
    /// past the end of a short final read are zeroed.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<bool, DiskManagerError> {
        let mut file = self.log_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(false);
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = ((file_size - offset) as usize).min(buf.len());
        file.read_exact(&mut buf[..available])?;
        buf[available..].fill(0);
        Ok(true)
    }

    /// Append `data` to the log file and sync it to disk
    pub fn write_log(&self, data: &[u8]) -> Result<(), DiskManagerError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut file = self.log_file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    /// Current size of the log file in bytes
    pub fn log_size(&self) -> Result<u64, DiskManagerError> {
        Ok(self.log_file.lock().metadata()?.len())
    }
}

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::common::config::LoggingFlag;
use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_LSN, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::storage::page::TablePage;
use crate::wal::log_record::{LogPayload, LogRecord, LogRecordType};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Corrupted log: {0}")]
    CorruptedLog(String),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;

/// ARIES-style crash recovery: one forward pass that analyzes and redoes
/// the whole log, then backward undo of loser transactions.
///
/// Logging is disabled for the duration so replay is not itself logged.
pub struct LogRecovery {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,
    logging_enabled: LoggingFlag,
    buffer_size: usize,

    /// TID -> last LSN seen; transactions still here after the scan lost
    active_txn: HashMap<TxnId, Lsn>,
    /// LSN -> file offset of the record, for the undo walk
    lsn_mapping: HashMap<Lsn, u64>,
}

impl LogRecovery {
    pub fn new(
        disk_manager: Arc<DiskManager>,
        buffer_pool: Arc<BufferPoolManager>,
        logging_enabled: LoggingFlag,
        buffer_size: usize,
    ) -> Self {
        Self {
            disk_manager,
            buffer_pool,
            logging_enabled,
            buffer_size,
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
        }
    }

    /// Run redo then undo. Leaves logging disabled; the caller re-enables
    /// it by restarting the flush thread.
    pub fn recover(&mut self) -> Result<()> {
        self.logging_enabled.store(false, Ordering::SeqCst);
        info!("recovery started");
        self.redo()?;
        info!(
            "redo complete: {} transaction(s) lost, {} record(s) mapped",
            self.active_txn.len(),
            self.lsn_mapping.len()
        );
        self.undo()?;
        info!("recovery complete");
        Ok(())
    }

    /// Loser transactions identified by the scan (diagnostics)
    pub fn loser_transactions(&self) -> Vec<TxnId> {
        self.active_txn.keys().copied().collect()
    }

    /// Forward pass: read the log in segments from the beginning, build
    /// the active-transaction and LSN-offset tables, and replay every data
    /// record whose effect is missing from its page.
    fn redo(&mut self) -> Result<()> {
        self.active_txn.clear();
        self.lsn_mapping.clear();

        let mut buf = vec![0u8; self.buffer_size];
        let mut offset = 0u64;

        while self.disk_manager.read_log(&mut buf, offset)? {
            let mut pos = 0;
            while let Some(record) = LogRecord::deserialize(&buf[pos..]) {
                match record.record_type {
                    LogRecordType::Begin => {
                        self.active_txn.insert(record.txn_id, record.lsn);
                    }
                    LogRecordType::Commit | LogRecordType::Abort => {
                        self.active_txn.remove(&record.txn_id);
                    }
                    _ => {
                        self.active_txn.insert(record.txn_id, record.lsn);
                    }
                }
                self.lsn_mapping.insert(record.lsn, offset + pos as u64);

                self.redo_record(&record)?;
                pos += record.size as usize;
            }

            if pos == 0 {
                // The window opens on an incomplete trailing record.
                debug!("incomplete log record at offset {}, redo stops", offset);
                return Ok(());
            }
            offset += pos as u64;
        }
        Ok(())
    }

    fn redo_record(&self, record: &LogRecord) -> Result<()> {
        match &record.payload {
            LogPayload::None => Ok(()),
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => self.redo_new_page(record, *prev_page_id, *page_id),
            LogPayload::Insert { rid, tuple } => {
                self.apply_if_missing(record, *rid, |table_page, rid| {
                    table_page.insert_tuple(rid, tuple);
                })
            }
            LogPayload::Update { rid, new_tuple, .. } => {
                self.apply_if_missing(record, *rid, |table_page, rid| {
                    table_page.update_tuple(rid, new_tuple);
                })
            }
            LogPayload::Delete { rid, .. } => match record.record_type {
                LogRecordType::MarkDelete => self.apply_if_missing(record, *rid, |tp, rid| {
                    tp.mark_delete(rid);
                }),
                LogRecordType::RollbackDelete => self.apply_if_missing(record, *rid, |tp, rid| {
                    tp.rollback_delete(rid);
                }),
                LogRecordType::ApplyDelete => self.apply_if_missing(record, *rid, |tp, rid| {
                    tp.apply_delete(rid);
                }),
                _ => unreachable!("delete payload with non-delete type"),
            },
        }
    }

    fn redo_new_page(&self, record: &LogRecord, prev_page_id: PageId, page_id: PageId) -> Result<()> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let dirty = {
            let mut guard = page.write();
            if guard.lsn() >= record.lsn {
                false
            } else {
                let mut table_page = TablePage::new(&mut guard);
                table_page.init(page_id, prev_page_id);
                guard.set_lsn(record.lsn);
                true
            }
        };
        self.buffer_pool.unpin_page(page_id, dirty)?;

        if dirty && prev_page_id != INVALID_PAGE_ID {
            let prev = self.buffer_pool.fetch_page(prev_page_id)?;
            {
                let mut guard = prev.write();
                let mut table_page = TablePage::new(&mut guard);
                table_page.set_next_page_id(page_id);
            }
            self.buffer_pool.unpin_page(prev_page_id, true)?;
        }
        Ok(())
    }

    /// Fetch the record's target page and apply `action` unless the page
    /// already carries this change (`page_lsn >= record.lsn`).
    fn apply_if_missing<F>(&self, record: &LogRecord, rid: Rid, action: F) -> Result<()>
    where
        F: FnOnce(&mut TablePage, Rid),
    {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let dirty = {
            let mut guard = page.write();
            if guard.lsn() >= record.lsn {
                false
            } else {
                let mut table_page = TablePage::new(&mut guard);
                action(&mut table_page, rid);
                guard.set_lsn(record.lsn);
                true
            }
        };
        self.buffer_pool.unpin_page(rid.page_id, dirty)?;
        Ok(())
    }

    /// Backward pass: roll every loser back along its `prev_lsn` chain,
    /// applying inverse operations until its BEGIN record.
    fn undo(&mut self) -> Result<()> {
        let losers: Vec<(TxnId, Lsn)> = self
            .active_txn
            .iter()
            .map(|(&tid, &lsn)| (tid, lsn))
            .collect();

        let mut buf = vec![0u8; self.buffer_size];
        for (txn_id, last_lsn) in losers {
            debug!("undoing loser transaction {} from LSN {}", txn_id, last_lsn);
            let mut lsn = last_lsn;
            loop {
                let offset = *self.lsn_mapping.get(&lsn).ok_or_else(|| {
                    RecoveryError::CorruptedLog(format!("no offset recorded for LSN {}", lsn))
                })?;
                if !self.disk_manager.read_log(&mut buf, offset)? {
                    return Err(RecoveryError::CorruptedLog(format!(
                        "log truncated at offset {}",
                        offset
                    )));
                }
                let record = LogRecord::deserialize(&buf).ok_or_else(|| {
                    RecoveryError::CorruptedLog(format!("undecodable record at offset {}", offset))
                })?;

                if record.record_type == LogRecordType::Begin {
                    break;
                }
                self.undo_record(&record)?;

                lsn = record.prev_lsn;
                if lsn == INVALID_LSN {
                    break;
                }
            }
        }
        Ok(())
    }

    fn undo_record(&self, record: &LogRecord) -> Result<()> {
        match (&record.record_type, &record.payload) {
            (LogRecordType::Insert, LogPayload::Insert { rid, .. }) => {
                self.apply_inverse(record, *rid, |tp, rid| {
                    tp.apply_delete(rid);
                })
            }
            (LogRecordType::MarkDelete, LogPayload::Delete { rid, .. }) => {
                self.apply_inverse(record, *rid, |tp, rid| {
                    tp.rollback_delete(rid);
                })
            }
            (LogRecordType::Update, LogPayload::Update { rid, old_tuple, .. }) => {
                self.apply_inverse(record, *rid, |tp, rid| {
                    tp.update_tuple(rid, old_tuple);
                })
            }
            // Other record types in a loser's chain need no inverse; the
            // walk just continues past them.
            _ => Ok(()),
        }
    }

    /// Apply an inverse operation unless the original change never reached
    /// the page (`page_lsn < record.lsn`), which also keeps a second
    /// recovery run from double-undoing.
    fn apply_inverse<F>(&self, record: &LogRecord, rid: Rid, action: F) -> Result<()>
    where
        F: FnOnce(&mut TablePage, Rid),
    {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let dirty = {
            let mut guard = page.write();
            if guard.lsn() < record.lsn {
                false
            } else {
                let mut table_page = TablePage::new(&mut guard);
                action(&mut table_page, rid);
                true
            }
        };
        self.buffer_pool.unpin_page(rid.page_id, dirty)?;
        Ok(())
    }
}

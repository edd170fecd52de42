use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::concurrency::lock_manager::LockManager;
use crate::concurrency::transaction::{Transaction, TransactionState};
use crate::wal::log_manager::{LogManager, LogManagerError};
use crate::wal::log_record::LogRecord;

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is not active")]
    NotActive(i32),

    #[error("WAL error: {0}")]
    LogError(#[from] LogManagerError),
}

pub type Result<T> = std::result::Result<T, TransactionError>;

/// Hands out transaction IDs and drives the begin/commit/abort protocol
/// against the WAL and the lock manager.
pub struct TransactionManager {
    next_txn_id: AtomicI32,
    lock_manager: Arc<LockManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Option<Arc<LogManager>>) -> Self {
        Self {
            next_txn_id: AtomicI32::new(0),
            lock_manager,
            log_manager,
        }
    }

    pub fn begin(&self) -> Result<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mut txn = Transaction::new(id);

        if let Some(log_manager) = self.logging() {
            let mut record = LogRecord::new_begin(id);
            let lsn = log_manager.append_log_record(&mut record)?;
            txn.set_prev_lsn(lsn);
        }
        Ok(txn)
    }

    /// Commit: the commit record is forced to disk before the caller sees
    /// success, and locks are released only after the state flips (so a
    /// strict lock manager accepts the unlocks).
    pub fn commit(&self, txn: &mut Transaction) -> Result<()> {
        if !matches!(
            txn.state(),
            TransactionState::Growing | TransactionState::Shrinking
        ) {
            return Err(TransactionError::NotActive(txn.id()));
        }

        if let Some(log_manager) = self.logging() {
            let mut record = LogRecord::new_commit(txn.id(), txn.prev_lsn());
            let lsn = log_manager.append_log_record(&mut record)?;
            txn.set_prev_lsn(lsn);
            log_manager.flush();
        }

        txn.set_state(TransactionState::Committed);
        self.release_all_locks(txn);
        Ok(())
    }

    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        if matches!(txn.state(), TransactionState::Committed) {
            return Err(TransactionError::NotActive(txn.id()));
        }

        if let Some(log_manager) = self.logging() {
            let mut record = LogRecord::new_abort(txn.id(), txn.prev_lsn());
            let lsn = log_manager.append_log_record(&mut record)?;
            txn.set_prev_lsn(lsn);
        }

        txn.set_state(TransactionState::Aborted);
        self.release_all_locks(txn);
        Ok(())
    }

    fn logging(&self) -> Option<&Arc<LogManager>> {
        self.log_manager
            .as_ref()
            .filter(|lm| lm.logging_enabled())
    }

    fn release_all_locks(&self, txn: &mut Transaction) {
        let rids: Vec<_> = txn
            .shared_lock_set()
            .iter()
            .chain(txn.exclusive_lock_set().iter())
            .copied()
            .collect();
        for rid in rids {
            self.lock_manager.unlock(txn, rid);
        }
    }
}

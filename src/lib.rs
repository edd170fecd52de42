// Export public modules
pub mod common;
pub mod concurrency;
pub mod index;
pub mod storage;
pub mod wal;

// Re-export key items for convenient access
pub use common::types::{Lsn, PageId, Rid, TxnId, PAGE_SIZE};
pub use concurrency::{LockManager, Transaction, TransactionManager, TransactionState};
pub use index::BPlusTree;
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::DiskManager;
pub use wal::{LogManager, LogRecord, LogRecordType, LogRecovery};

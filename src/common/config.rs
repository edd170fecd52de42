use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::common::types::PAGE_SIZE;

/// How long the WAL flush thread sleeps between group-commit cycles
pub const LOG_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a lock request waits before the transaction is aborted
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Capacity of the in-memory WAL buffer
pub const LOG_BUFFER_SIZE: usize = PAGE_SIZE * 8;

/// Shared handle for the engine-wide "logging enabled" switch.
///
/// Owned by the log manager and cloned into the buffer pool and recovery;
/// recovery turns it off while replaying so replay itself is not logged.
pub type LoggingFlag = Arc<AtomicBool>;

pub fn new_logging_flag() -> LoggingFlag {
    Arc::new(AtomicBool::new(false))
}

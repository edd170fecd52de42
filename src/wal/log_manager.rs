use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use crate::common::config::{new_logging_flag, LoggingFlag, LOG_BUFFER_SIZE, LOG_TIMEOUT};
use crate::common::types::{Lsn, INVALID_LSN};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::wal::log_record::LogRecord;

#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),

    #[error("Log record of {0} bytes exceeds the log buffer capacity")]
    RecordTooLarge(usize),

    #[error("Invalid log state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, LogManagerError>;

/// Configuration for the log manager
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// Capacity of the in-memory log buffer
    pub buffer_size: usize,

    /// How long the flush thread sleeps between group-commit cycles
    pub flush_timeout: Duration,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            buffer_size: LOG_BUFFER_SIZE,
            flush_timeout: LOG_TIMEOUT,
        }
    }
}

struct AppendState {
    buffer: Vec<u8>,
    next_lsn: Lsn,
}

struct FlushCoord {
    running: bool,
}

/// Write-ahead log manager: serialized appends into an in-memory buffer,
/// flushed to disk by a single background group-commit thread.
///
/// The append mutex guards the log buffer and `next_lsn`; the flush-buffer
/// mutex guards the swap and the `persistent_lsn` scan; two condvars on
/// the coordination mutex connect appenders, explicit flushers, and the
/// flush thread.
pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    config: LogManagerConfig,
    append_state: Mutex<AppendState>,
    flush_buffer: Mutex<Vec<u8>>,
    persistent_lsn: AtomicI32,
    coord: Mutex<FlushCoord>,
    wake_flusher: Condvar,
    flush_done: Condvar,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
    logging_enabled: LoggingFlag,
}

impl LogManager {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        Self::with_config(disk_manager, LogManagerConfig::default())
    }

    pub fn with_config(disk_manager: Arc<DiskManager>, config: LogManagerConfig) -> Self {
        // Resume LSN assignment after whatever already sits in the log.
        let max_existing = scan_max_lsn(&disk_manager, config.buffer_size);
        Self {
            disk_manager,
            config,
            append_state: Mutex::new(AppendState {
                buffer: Vec::new(),
                next_lsn: max_existing + 1,
            }),
            flush_buffer: Mutex::new(Vec::new()),
            persistent_lsn: AtomicI32::new(max_existing),
            coord: Mutex::new(FlushCoord { running: false }),
            wake_flusher: Condvar::new(),
            flush_done: Condvar::new(),
            flush_thread: Mutex::new(None),
            logging_enabled: new_logging_flag(),
        }
    }

    /// Shared handle for the engine-wide logging switch
    pub fn logging_flag(&self) -> LoggingFlag {
        self.logging_enabled.clone()
    }

    pub fn logging_enabled(&self) -> bool {
        self.logging_enabled.load(Ordering::SeqCst)
    }

    /// Highest LSN known to be durable
    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    /// Next LSN that will be assigned (diagnostics)
    pub fn next_lsn(&self) -> Lsn {
        self.append_state.lock().unwrap().next_lsn
    }

    /// Append `record` to the log buffer, assigning and stamping its LSN.
    /// LSN order equals append order. A record that would overflow the
    /// buffer triggers a synchronous flush first.
    pub fn append_log_record(&self, record: &mut LogRecord) -> Result<Lsn> {
        let record_size = record.size as usize;
        if record_size > self.config.buffer_size {
            return Err(LogManagerError::RecordTooLarge(record_size));
        }

        loop {
            {
                let mut state = self.append_state.lock().unwrap();
                if state.buffer.len() + record_size <= self.config.buffer_size {
                    record.lsn = state.next_lsn;
                    state.next_lsn += 1;
                    record.serialize_into(&mut state.buffer);
                    return Ok(record.lsn);
                }
            }
            // Full: wait for a flush cycle without holding the append mutex.
            self.flush();
        }
    }

    /// Force everything appended so far to disk. The flush cycle is
    /// triggered twice so a record that arrived mid-cycle is still durable
    /// when this returns.
    pub fn flush(&self) {
        self.trigger_flush();
        self.trigger_flush();
    }

    /// Block until the record at `lsn` is durable
    pub fn flush_until(&self, lsn: Lsn) {
        while self.persistent_lsn() < lsn {
            self.flush();
        }
    }

    /// Start the background flush thread and enable logging
    pub fn run_flush_thread(self: &Arc<Self>) {
        let mut coord = self.coord.lock().unwrap();
        if coord.running {
            return;
        }
        coord.running = true;
        drop(coord);

        self.logging_enabled.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("wal-flusher".to_string())
            .spawn(move || this.flush_loop())
            .expect("failed to spawn WAL flush thread");
        *self.flush_thread.lock().unwrap() = Some(handle);
    }

    /// Drain the log, stop the flush thread, and disable logging
    pub fn stop_flush_thread(&self) {
        self.logging_enabled.store(false, Ordering::SeqCst);
        {
            let coord = self.coord.lock().unwrap();
            if !coord.running {
                return;
            }
        }
        self.flush();

        self.coord.lock().unwrap().running = false;
        self.wake_flusher.notify_all();
        if let Some(handle) = self.flush_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn flush_loop(&self) {
        log::debug!("WAL flush thread started");
        loop {
            let coord = self.coord.lock().unwrap();
            if !coord.running {
                break;
            }
            let (coord, _timeout) = self
                .wake_flusher
                .wait_timeout(coord, self.config.flush_timeout)
                .unwrap();
            let still_running = coord.running;
            drop(coord);

            self.flush_cycle();
            self.flush_done.notify_all();

            if !still_running {
                break;
            }
        }
        log::debug!("WAL flush thread stopped");
    }

    fn trigger_flush(&self) {
        let coord = self.coord.lock().unwrap();
        if coord.running {
            self.wake_flusher.notify_all();
            let _coord = self.flush_done.wait(coord).unwrap();
        } else {
            drop(coord);
            // No background thread: run the cycle inline.
            self.flush_cycle();
        }
    }

    /// One group-commit cycle: swap the buffers, write the flush buffer,
    /// and advance `persistent_lsn` to the highest LSN flushed.
    fn flush_cycle(&self) {
        let mut flush_buffer = self.flush_buffer.lock().unwrap();
        {
            let mut state = self.append_state.lock().unwrap();
            std::mem::swap(&mut state.buffer, &mut *flush_buffer);
            if flush_buffer.is_empty() {
                // Nothing pending anywhere: everything assigned is durable.
                self.persistent_lsn
                    .store(state.next_lsn - 1, Ordering::SeqCst);
                return;
            }
        }

        if let Err(e) = self.disk_manager.write_log(&flush_buffer) {
            // The flusher never propagates errors to callers.
            log::error!("WAL flush failed: {}", e);
            flush_buffer.clear();
            return;
        }

        let mut max_lsn = self.persistent_lsn();
        let mut pos = 0;
        while let Some(record) = LogRecord::deserialize(&flush_buffer[pos..]) {
            max_lsn = max_lsn.max(record.lsn);
            pos += record.size as usize;
        }
        debug_assert_ne!(max_lsn, INVALID_LSN);
        self.persistent_lsn.store(max_lsn, Ordering::SeqCst);
        flush_buffer.clear();
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.stop_flush_thread();
    }
}

/// Scan an existing log file for its highest LSN; INVALID_LSN if empty
fn scan_max_lsn(disk_manager: &DiskManager, buffer_size: usize) -> Lsn {
    let mut max_lsn = INVALID_LSN;
    let mut buf = vec![0u8; buffer_size];
    let mut offset = 0u64;

    while let Ok(true) = disk_manager.read_log(&mut buf, offset) {
        let mut pos = 0;
        while let Some(record) = LogRecord::deserialize(&buf[pos..]) {
            max_lsn = max_lsn.max(record.lsn);
            pos += record.size as usize;
        }
        if pos == 0 {
            break;
        }
        offset += pos as u64;
    }
    max_lsn
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_log_manager() -> (Arc<LogManager>, Arc<DiskManager>, TempDir) {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path().join("test.db")).unwrap());
        let log_manager = Arc::new(LogManager::new(disk.clone()));
        (log_manager, disk, dir)
    }

    #[test]
    fn test_append_assigns_sequential_lsns() {
        let (log_manager, _disk, _dir) = test_log_manager();

        let mut first = LogRecord::new_begin(1);
        let mut second = LogRecord::new_commit(1, 0);
        let lsn1 = log_manager.append_log_record(&mut first).unwrap();
        let lsn2 = log_manager.append_log_record(&mut second).unwrap();

        assert_eq!(lsn1, 0);
        assert_eq!(lsn2, 1);
        assert_eq!(first.lsn, lsn1);
    }

    #[test]
    fn test_flush_advances_persistent_lsn() {
        let (log_manager, disk, _dir) = test_log_manager();
        assert_eq!(log_manager.persistent_lsn(), INVALID_LSN);

        let mut record = LogRecord::new_begin(1);
        let lsn = log_manager.append_log_record(&mut record).unwrap();
        log_manager.flush();

        assert_eq!(log_manager.persistent_lsn(), lsn);
        assert!(disk.log_size().unwrap() > 0);
    }

    #[test]
    fn test_flush_until_is_satisfied() {
        let (log_manager, _disk, _dir) = test_log_manager();
        let mut last = INVALID_LSN;
        for i in 0..10 {
            let mut record = LogRecord::new_begin(i);
            last = log_manager.append_log_record(&mut record).unwrap();
        }
        assert_eq!(last, 9);
        log_manager.flush_until(last);
        assert!(log_manager.persistent_lsn() >= last);
    }

    #[test]
    fn test_background_flusher_group_commits() {
        let (log_manager, _disk, _dir) = test_log_manager();
        log_manager.run_flush_thread();
        assert!(log_manager.logging_enabled());

        let mut record = LogRecord::new_begin(7);
        let lsn = log_manager.append_log_record(&mut record).unwrap();
        log_manager.flush();
        assert!(log_manager.persistent_lsn() >= lsn);

        log_manager.stop_flush_thread();
        assert!(!log_manager.logging_enabled());
    }

    #[test]
    fn test_lsn_resumes_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");

        let last = {
            let disk = Arc::new(DiskManager::new(&path).unwrap());
            let log_manager = LogManager::new(disk);
            let mut last = INVALID_LSN;
            for i in 0..5 {
                let mut record = LogRecord::new_begin(i);
                last = log_manager.append_log_record(&mut record).unwrap();
            }
            log_manager.flush();
            last
        };

        let disk = Arc::new(DiskManager::new(&path).unwrap());
        let reopened = LogManager::new(disk);
        assert_eq!(reopened.persistent_lsn(), last);
        assert_eq!(reopened.next_lsn(), last + 1);
    }

    #[test]
    fn test_oversized_record_is_rejected() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path().join("t.db")).unwrap());
        let log_manager = LogManager::with_config(
            disk,
            LogManagerConfig {
                buffer_size: 64,
                flush_timeout: Duration::from_millis(50),
            },
        );

        let tuple = crate::storage::page::Tuple::new(vec![0u8; 256]);
        let mut record =
            LogRecord::new_insert(1, INVALID_LSN, crate::common::types::Rid::new(1, 0), tuple);
        assert!(matches!(
            log_manager.append_log_record(&mut record),
            Err(LogManagerError::RecordTooLarge(_))
        ));
    }

    #[test]
    fn test_small_buffer_forces_intermediate_flushes() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path().join("t.db")).unwrap());
        let log_manager = LogManager::with_config(
            disk.clone(),
            LogManagerConfig {
                buffer_size: 64,
                flush_timeout: Duration::from_millis(50),
            },
        );

        for i in 0..10 {
            let mut record = LogRecord::new_begin(i);
            log_manager.append_log_record(&mut record).unwrap();
        }
        log_manager.flush();
        assert_eq!(log_manager.persistent_lsn(), 9);
        assert_eq!(
            disk.log_size().unwrap(),
            10 * LogRecord::HEADER_SIZE as u64
        );
    }
}

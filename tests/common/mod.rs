use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use karstdb::storage::buffer::BufferPoolManager;
use karstdb::storage::disk::DiskManager;
use karstdb::wal::LogManager;

// Create a buffer pool over a temporary database file
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, TempDir)> {
    let dir = TempDir::new()?;
    let disk_manager = Arc::new(DiskManager::new(dir.path().join("test.db"))?);
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
    Ok((buffer_pool, dir))
}

// Create a WAL-backed engine: disk manager, log manager, and buffer pool
#[allow(dead_code)]
pub fn create_test_engine(
    pool_size: usize,
) -> Result<(
    Arc<DiskManager>,
    Arc<LogManager>,
    Arc<BufferPoolManager>,
    TempDir,
)> {
    let dir = TempDir::new()?;
    let disk_manager = Arc::new(DiskManager::new(dir.path().join("test.db"))?);
    let log_manager = Arc::new(LogManager::new(disk_manager.clone()));
    let buffer_pool = Arc::new(BufferPoolManager::new_with_wal(
        pool_size,
        disk_manager.clone(),
        log_manager.clone(),
    ));
    Ok((disk_manager, log_manager, buffer_pool, dir))
}

use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Buffer pool out of memory")]
    OutOfMemory,

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Index corrupted: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, BTreeError>;

use std::io;

use thiserror::Error;

use crate::common::config::PageId;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("page {0} has not been allocated")]
    PageNotAllocated(PageId),

    #[error("page {0} has been deallocated")]
    PageDeallocated(PageId),

    #[error("disk scheduler dropped a request for page {0}")]
    DiskRequestDropped(PageId),

    #[error("page layout does not fit: {0}")]
    PageLayout(String),

    #[error("buffer pool exhausted: every frame is pinned")]
    PoolExhausted,

    #[error("hash table directory is at maximum depth")]
    DirectoryFull,
}

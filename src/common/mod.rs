pub mod config;
pub mod error;

pub use config::{
    AccessType, BufferPoolConfig, FrameId, PageId, ReplacerPolicy, INVALID_PAGE_ID, PAGE_SIZE,
};
pub use error::{Result, StorageError};

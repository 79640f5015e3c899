mod extendible_hash_table_test;
mod page_guard_test;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    buffer::buffer_pool_manager::BufferPoolManager,
    common::{BufferPoolConfig, ReplacerPolicy},
    storage::disk::manager::MemoryDiskManager,
};

/// Pool over an in-memory disk, LRU-K with k = 2 unless a test overrides.
pub(crate) fn make_pool(
    pool_size: usize,
    policy: ReplacerPolicy,
) -> (Arc<BufferPoolManager>, Arc<Mutex<MemoryDiskManager>>) {
    let disk = Arc::new(Mutex::new(MemoryDiskManager::new()));
    let config = BufferPoolConfig {
        pool_size,
        replacer_k: 2,
        policy,
        ..Default::default()
    };
    let bpm = Arc::new(BufferPoolManager::new(config, disk.clone()));
    (bpm, disk)
}

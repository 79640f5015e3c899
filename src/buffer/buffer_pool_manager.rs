use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{
    common::{
        AccessType, BufferPoolConfig, FrameId, PageId, ReplacerPolicy, Result, StorageError,
        INVALID_PAGE_ID, PAGE_SIZE,
    },
    storage::{
        disk::{
            manager::{DiskManager, SharedDiskManager},
            scheduler::{DiskData, DiskRequest, DiskScheduler},
        },
        page::page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard},
    },
    utils::replacer::{ClockReplacer, LruKReplacer, LruReplacer, Replacer},
};

/// The latched part of a frame: which page is resident and its payload.
pub struct FrameData {
    page_id: PageId,
    data: Box<[u8]>,
}

impl FrameData {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// One slot of the buffer pool. Pin count and dirty flag are atomics whose
/// transitions happen under the pool latch; the payload and resident page id
/// sit behind the per-frame readers-writer latch.
pub struct FrameHeader {
    frame_id: FrameId,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    frame: Arc<RwLock<FrameData>>,
}

impl FrameHeader {
    fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            frame: Arc::new(RwLock::new(FrameData {
                page_id: INVALID_PAGE_ID,
                data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            })),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Release);
    }

    /// The frame latch. Shared for reads of the payload, exclusive for
    /// writes; guards hold it for their whole lifetime.
    pub fn frame(&self) -> &Arc<RwLock<FrameData>> {
        &self.frame
    }
}

// Page table, free list and replacer all live behind the single pool latch.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
}

/// A fixed pool of frames caching disk pages, with pin/unpin accounting,
/// write-back of dirty victims, and a replacement policy chosen at
/// construction.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: usize,
    instance_index: usize,

    frames: Vec<Arc<FrameHeader>>,
    state: Mutex<PoolState>,

    disk_scheduler: DiskScheduler,
    disk_manager: SharedDiskManager,
}

impl BufferPoolManager {
    pub fn new(config: BufferPoolConfig, disk_manager: SharedDiskManager) -> Self {
        assert!(config.pool_size >= 1, "pool needs at least one frame");
        assert!(config.replacer_k >= 1, "LRU-K needs k >= 1");
        assert!(config.num_instances >= 1, "id space needs an instance");
        assert!(
            config.instance_index < config.num_instances,
            "instance index out of range"
        );

        let frames = (0..config.pool_size)
            .map(|frame_id| Arc::new(FrameHeader::new(frame_id)))
            .collect();

        let replacer: Box<dyn Replacer> = match config.policy {
            ReplacerPolicy::Lru => Box::new(LruReplacer::new(config.pool_size)),
            ReplacerPolicy::Clock => Box::new(ClockReplacer::new(config.pool_size)),
            ReplacerPolicy::LruK => {
                Box::new(LruKReplacer::new(config.pool_size, config.replacer_k))
            }
        };

        Self {
            pool_size: config.pool_size,
            num_instances: config.num_instances,
            instance_index: config.instance_index,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(config.pool_size),
                free_list: (0..config.pool_size).collect(),
                replacer,
            }),
            disk_scheduler: DiskScheduler::new(Arc::clone(&disk_manager)),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page on disk and pin it into a zeroed frame.
    /// Returns `None` when every frame is pinned.
    pub fn new_page(&self) -> Result<Option<(PageId, Arc<FrameHeader>)>> {
        let mut state = self.state.lock();

        let page_id = self.allocate_page_id()?;
        let Some(frame_id) = self.acquire_frame(&mut state)? else {
            warn!(page_id, "buffer pool exhausted, dropping fresh page");
            self.deallocate_page_id(page_id)?;
            return Ok(None);
        };

        let frame = &self.frames[frame_id];
        {
            let mut data = frame.frame.write();
            data.page_id = page_id;
            data.data.fill(0);
        }
        frame.pin_count.store(1, Ordering::Release);
        frame.is_dirty.store(false, Ordering::Release);
        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id, AccessType::Unknown);
        state.replacer.set_evictable(frame_id, false);

        debug!(page_id, frame_id, "new page");
        Ok(Some((page_id, Arc::clone(frame))))
    }

    /// Pin the requested page, reading it from disk on a miss. Returns
    /// `None` when no frame is free and nothing is evictable.
    pub fn fetch_page(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<Option<Arc<FrameHeader>>> {
        if page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            frame.pin_count.fetch_add(1, Ordering::AcqRel);
            state.replacer.record_access(frame_id, access_type);
            state.replacer.set_evictable(frame_id, false);
            return Ok(Some(Arc::clone(frame)));
        }

        let Some(frame_id) = self.acquire_frame(&mut state)? else {
            warn!(page_id, "buffer pool exhausted, cannot fetch");
            return Ok(None);
        };

        let frame = &self.frames[frame_id];
        let mut data = frame.frame.write();
        data.page_id = page_id;
        match self.read_from_disk(page_id, &mut data.data) {
            Ok(()) => {
                drop(data);
                frame.pin_count.store(1, Ordering::Release);
                frame.is_dirty.store(false, Ordering::Release);
                state.page_table.insert(page_id, frame_id);
                state.replacer.record_access(frame_id, access_type);
                state.replacer.set_evictable(frame_id, false);
                debug!(page_id, frame_id, "fetched page from disk");
                Ok(Some(Arc::clone(frame)))
            }
            Err(err) => {
                // The frame goes back to the free list in pristine shape.
                data.page_id = INVALID_PAGE_ID;
                drop(data);
                state.free_list.push_back(frame_id);
                Err(err)
            }
        }
    }

    /// Drop one pin. Returns false when the page is not resident or already
    /// unpinned; the dirty flag only ever accumulates.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool, _access_type: AccessType) -> bool {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id];

        let pins = frame.pin_count.load(Ordering::Acquire);
        if pins == 0 {
            return false;
        }

        if is_dirty {
            frame.is_dirty.store(true, Ordering::Release);
        }
        frame.pin_count.store(pins - 1, Ordering::Release);
        if pins == 1 {
            state.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write the page back if it is dirty, regardless of pin count. Returns
    /// false when the page is not resident. A clean page is left untouched,
    /// so back-to-back flushes issue a single disk write.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let frame = {
            let state = self.state.lock();
            match state.page_table.get(&page_id) {
                Some(&frame_id) => Arc::clone(&self.frames[frame_id]),
                None => return Ok(false),
            }
        };

        // Latched after the pool latch is gone; flushing is a side channel
        // and must not stall the pool during I/O.
        let data = frame.frame.read();
        if data.page_id != page_id {
            // Evicted in the window between lookup and latch; the eviction
            // already wrote the page back.
            return Ok(true);
        }
        if !frame.is_dirty.load(Ordering::Acquire) {
            return Ok(true);
        }

        self.write_to_disk(page_id, &data.data)?;
        frame.is_dirty.store(false, Ordering::Release);
        debug!(page_id, "flushed page");
        Ok(true)
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids: Vec<PageId> = self.state.lock().page_table.keys().copied().collect();
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Evict and deallocate a page. Returns false while the page is pinned.
    /// Deleting a page that is not resident only deallocates it on disk.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            drop(state);
            self.deallocate_page_id(page_id)?;
            return Ok(true);
        };

        let frame = &self.frames[frame_id];
        if frame.pin_count.load(Ordering::Acquire) > 0 {
            return Ok(false);
        }

        {
            let mut data = frame.frame.write();
            if frame.is_dirty.load(Ordering::Acquire) {
                self.write_to_disk(page_id, &data.data)?;
            }
            data.page_id = INVALID_PAGE_ID;
            data.data.fill(0);
        }
        frame.pin_count.store(0, Ordering::Release);
        frame.is_dirty.store(false, Ordering::Release);
        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        state.free_list.push_back(frame_id);
        drop(state);

        self.deallocate_page_id(page_id)?;
        debug!(page_id, frame_id, "deleted page");
        Ok(true)
    }

    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        let &frame_id = state.page_table.get(&page_id)?;
        Some(self.frames[frame_id].pin_count.load(Ordering::Acquire))
    }

    /// Fetch wrapped in a guard that unpins on drop and flushes if dirtied.
    pub fn fetch_page_basic(self: &Arc<Self>, page_id: PageId) -> Result<Option<BasicPageGuard>> {
        let Some(frame) = self.fetch_page(page_id, AccessType::Unknown)? else {
            return Ok(None);
        };
        Ok(Some(BasicPageGuard::new(Arc::clone(self), page_id, frame)))
    }

    /// Fetch holding the frame latch shared for the guard's lifetime.
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> Result<Option<ReadPageGuard>> {
        let Some(frame) = self.fetch_page(page_id, AccessType::Read)? else {
            return Ok(None);
        };
        let guard = frame.frame().read_arc();
        Ok(Some(ReadPageGuard::new(
            Arc::clone(self),
            page_id,
            guard,
        )))
    }

    /// Fetch holding the frame latch exclusive for the guard's lifetime.
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> Result<Option<WritePageGuard>> {
        let Some(frame) = self.fetch_page(page_id, AccessType::Write)? else {
            return Ok(None);
        };
        let guard = frame.frame().write_arc();
        Ok(Some(WritePageGuard::new(
            Arc::clone(self),
            page_id,
            frame,
            guard,
        )))
    }

    /// `new_page` wrapped in a basic guard; the new page id is on the guard.
    pub fn new_page_guarded(self: &Arc<Self>) -> Result<Option<BasicPageGuard>> {
        let Some((page_id, frame)) = self.new_page()? else {
            return Ok(None);
        };
        Ok(Some(BasicPageGuard::new(Arc::clone(self), page_id, frame)))
    }

    // Frame acquisition: free list first, then victims from the replacer.
    // A victim whose write-back fails stays dirty, goes back under the
    // replacer's tracking, and the next victim is tried; attempts are
    // bounded by the evictable count at entry so a wedged disk cannot spin
    // this loop forever.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<Option<FrameId>> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let mut last_err = None;
        let mut attempts = state.replacer.size();
        while attempts > 0 {
            attempts -= 1;
            let Some(victim) = state.replacer.evict() else {
                break;
            };

            let frame = &self.frames[victim];
            let mut data = frame.frame.write();
            let old_page_id = data.page_id;

            if frame.is_dirty.load(Ordering::Acquire) {
                match self.write_to_disk(old_page_id, &data.data) {
                    Ok(()) => frame.is_dirty.store(false, Ordering::Release),
                    Err(err) => {
                        warn!(
                            page_id = old_page_id,
                            frame_id = victim,
                            %err,
                            "write-back failed, trying another victim"
                        );
                        state.replacer.record_access(victim, AccessType::Unknown);
                        state.replacer.set_evictable(victim, true);
                        last_err = Some(err);
                        continue;
                    }
                }
            }

            debug!(page_id = old_page_id, frame_id = victim, "evicted page");
            state.page_table.remove(&old_page_id);
            data.page_id = INVALID_PAGE_ID;
            return Ok(Some(victim));
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    fn allocate_page_id(&self) -> Result<PageId> {
        let page_id = self.disk_manager.lock().allocate_page()?;
        debug_assert_eq!(
            page_id.rem_euclid(self.num_instances as i64),
            self.instance_index as i64,
            "allocated page id maps to another pool instance"
        );
        Ok(page_id)
    }

    fn deallocate_page_id(&self, page_id: PageId) -> Result<()> {
        self.disk_manager.lock().deallocate_page(page_id)
    }

    fn write_to_disk(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let (done, wait) = DiskScheduler::create_channel();
        self.disk_scheduler.schedule(DiskRequest {
            page_id,
            data: DiskData::Write(Box::from(data)),
            done,
        });
        wait.recv()
            .map_err(|_| StorageError::DiskRequestDropped(page_id))?
    }

    fn read_from_disk(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        let buffer = Arc::new(Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()));
        let (done, wait) = DiskScheduler::create_channel();
        self.disk_scheduler.schedule(DiskRequest {
            page_id,
            data: DiskData::Read(Arc::clone(&buffer)),
            done,
        });
        wait.recv()
            .map_err(|_| StorageError::DiskRequestDropped(page_id))??;
        buf.copy_from_slice(&buffer.lock());
        Ok(())
    }

    // Introspection used by the invariant tests.

    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    pub fn evictable_count(&self) -> usize {
        self.state.lock().replacer.size()
    }

    pub(crate) fn page_table_snapshot(&self) -> Vec<(PageId, FrameId)> {
        let state = self.state.lock();
        state.page_table.iter().map(|(&p, &f)| (p, f)).collect()
    }

    pub(crate) fn frame_page_id(&self, frame_id: FrameId) -> PageId {
        self.frames[frame_id].frame.read().page_id
    }

    pub(crate) fn frame_pin_count(&self, frame_id: FrameId) -> u32 {
        self.frames[frame_id].pin_count.load(Ordering::Acquire)
    }
}

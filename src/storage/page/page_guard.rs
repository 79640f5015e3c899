use std::sync::Arc;

use parking_lot::{
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
    RawRwLock,
};
use tracing::warn;

use crate::{
    buffer::buffer_pool_manager::{BufferPoolManager, FrameData, FrameHeader},
    common::{AccessType, PageId},
};

/// Shared frame latch held for a guard's lifetime.
pub type FrameReadGuard = ArcRwLockReadGuard<RawRwLock, FrameData>;
/// Exclusive frame latch held for a guard's lifetime.
pub type FrameWriteGuard = ArcRwLockWriteGuard<RawRwLock, FrameData>;

struct BasicGuardInner {
    bpm: Arc<BufferPoolManager>,
    frame: Arc<FrameHeader>,
    page_id: PageId,
}

/// A pinned page without a held latch. Data access latches the frame for the
/// duration of the closure; mutation marks the frame dirty. Dropping the
/// guard flushes a dirty page and releases the pin on every exit path.
pub struct BasicPageGuard {
    inner: Option<BasicGuardInner>,
}

impl BasicPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, frame: Arc<FrameHeader>) -> Self {
        Self {
            inner: Some(BasicGuardInner {
                bpm,
                frame,
                page_id,
            }),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.inner.as_ref().expect("guard already dropped").page_id
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let inner = self.inner.as_ref().expect("guard already dropped");
        let data = inner.frame.frame().read();
        f(data.data())
    }

    pub fn with_data_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let inner = self.inner.as_mut().expect("guard already dropped");
        let mut data = inner.frame.frame().write();
        // Marked under the latch so a concurrent flush cannot clear the
        // flag between the mark and the mutation.
        inner.frame.mark_dirty();
        f(data.data_mut())
    }

    /// Trade the basic guard for one holding the frame latch shared. The
    /// pin carries over; any dirtying already sticks to the frame.
    pub fn upgrade_read(mut self) -> ReadPageGuard {
        let inner = self.inner.take().expect("guard already dropped");
        let guard = inner.frame.frame().read_arc();
        ReadPageGuard {
            inner: Some(ReadGuardInner {
                bpm: inner.bpm,
                page_id: inner.page_id,
                guard,
            }),
        }
    }

    /// Trade the basic guard for one holding the frame latch exclusive.
    pub fn upgrade_write(mut self) -> WritePageGuard {
        let inner = self.inner.take().expect("guard already dropped");
        let guard = inner.frame.frame().write_arc();
        WritePageGuard {
            inner: Some(WriteGuardInner {
                bpm: inner.bpm,
                page_id: inner.page_id,
                frame: inner.frame,
                guard,
            }),
        }
    }

    /// Flush-if-dirty and unpin now instead of at end of scope. Safe to call
    /// more than once; the destructor becomes a no-op afterwards.
    pub fn release(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        if inner.frame.is_dirty() {
            if let Err(err) = inner.bpm.flush_page(inner.page_id) {
                warn!(page_id = inner.page_id, %err, "flush on guard drop failed");
            }
        }
        // A successful flush cleared the dirty flag, making this a clean
        // unpin; a failed one left it set for the eviction write-back.
        inner
            .bpm
            .unpin_page(inner.page_id, inner.frame.is_dirty(), AccessType::Unknown);
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.release();
    }
}

struct ReadGuardInner {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    guard: FrameReadGuard,
}

/// A pinned page with its frame latch held in shared mode. Readers block
/// writers for exactly as long as the guard lives; dropping releases the
/// latch before the pin.
pub struct ReadPageGuard {
    inner: Option<ReadGuardInner>,
}

impl ReadPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, guard: FrameReadGuard) -> Self {
        Self {
            inner: Some(ReadGuardInner {
                bpm,
                page_id,
                guard,
            }),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.inner.as_ref().expect("guard already dropped").page_id
    }

    pub fn data(&self) -> &[u8] {
        self.inner
            .as_ref()
            .expect("guard already dropped")
            .guard
            .data()
    }

    pub fn release(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        let ReadGuardInner {
            bpm,
            page_id,
            guard,
        } = inner;
        // Latch goes first, pin second; nothing here ever takes the pool
        // latch while a frame latch is held.
        drop(guard);
        bpm.unpin_page(page_id, false, AccessType::Read);
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        self.release();
    }
}

struct WriteGuardInner {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    frame: Arc<FrameHeader>,
    guard: FrameWriteGuard,
}

/// A pinned page with its frame latch held exclusive. The page is assumed
/// written: dropping the guard always unpins dirty.
pub struct WritePageGuard {
    inner: Option<WriteGuardInner>,
}

impl WritePageGuard {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        page_id: PageId,
        frame: Arc<FrameHeader>,
        guard: FrameWriteGuard,
    ) -> Self {
        Self {
            inner: Some(WriteGuardInner {
                bpm,
                page_id,
                frame,
                guard,
            }),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.inner.as_ref().expect("guard already dropped").page_id
    }

    pub fn data(&self) -> &[u8] {
        self.inner
            .as_ref()
            .expect("guard already dropped")
            .guard
            .data()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.inner
            .as_mut()
            .expect("guard already dropped")
            .guard
            .data_mut()
    }

    pub fn release(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        let WriteGuardInner {
            bpm,
            page_id,
            frame,
            guard,
        } = inner;
        // Dirty is forced while the latch is still held, then the latch
        // goes, then the pin.
        frame.mark_dirty();
        drop(guard);
        bpm.unpin_page(page_id, true, AccessType::Write);
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.release();
    }
}

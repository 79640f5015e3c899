use hashlink::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::{AccessType, FrameId};
use crate::utils::replacer::Replacer;

struct LruState {
    // Unpinned frames in LRU order; the front is the victim. The map keys
    // double as the linked list, giving O(1) un-listing on pin.
    candidates: LinkedHashMap<FrameId, ()>,
    // Per-frame pin counts; -1 marks a frame the replacer is not tracking.
    pin_counts: Vec<i64>,
}

/// Least-recently-used replacement. Pinning un-lists a frame on its 0→1 pin
/// transition only; unpinning re-lists it at the back when the count returns
/// to zero.
pub struct LruReplacer {
    state: Mutex<LruState>,
}

impl LruReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            state: Mutex::new(LruState {
                candidates: LinkedHashMap::with_capacity(num_frames),
                pin_counts: vec![-1; num_frames],
            }),
        }
    }
}

impl Replacer for LruReplacer {
    fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        let mut state = self.state.lock();
        if frame_id >= state.pin_counts.len() {
            return;
        }
        // First sight brings the frame under tracking; recency only changes
        // when the frame is unpinned back into the candidate list.
        if state.pin_counts[frame_id] < 0 {
            state.pin_counts[frame_id] = 0;
        }
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock();
        if frame_id >= state.pin_counts.len() {
            return;
        }

        if evictable {
            // Unpin: re-list on the transition back to zero.
            if state.pin_counts[frame_id] != 0 {
                state.pin_counts[frame_id] = 0;
                state.candidates.insert(frame_id, ());
            }
        } else {
            // Pin: un-list on the 0→1 transition only.
            if state.pin_counts[frame_id] >= 0 {
                if state.pin_counts[frame_id] == 0 {
                    state.candidates.remove(&frame_id);
                }
                state.pin_counts[frame_id] += 1;
            }
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        let (frame_id, _) = state.candidates.pop_front()?;
        state.pin_counts[frame_id] = -1;
        Some(frame_id)
    }

    fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if frame_id >= state.pin_counts.len() {
            return;
        }
        state.candidates.remove(&frame_id);
        state.pin_counts[frame_id] = -1;
    }

    fn size(&self) -> usize {
        self.state.lock().candidates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::AccessType::Unknown;

    #[test]
    fn evicts_oldest_unpinned() {
        let replacer = LruReplacer::new(4);

        for frame in 0..3 {
            replacer.record_access(frame, Unknown);
            replacer.set_evictable(frame, true);
        }
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn pinning_removes_from_victim_queue() {
        let replacer = LruReplacer::new(4);

        for frame in 0..3 {
            replacer.record_access(frame, Unknown);
            replacer.set_evictable(frame, true);
        }

        replacer.set_evictable(0, false);
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.evict(), Some(1));

        // Repeated pins only un-list once; one unpin re-lists at the back.
        replacer.set_evictable(0, false);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(0));
    }
}

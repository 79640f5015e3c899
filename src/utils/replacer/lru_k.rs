use std::collections::HashMap;

use hashlink::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::{AccessType, FrameId};
use crate::utils::replacer::Replacer;

struct LruKNode {
    access_count: usize,
    is_evictable: bool,
}

struct LruKState {
    node_store: HashMap<FrameId, LruKNode>,
    // Frames with fewer than k accesses, FIFO by first access. Scanned
    // before `cold`, so pages that never earned k references go first.
    hot: LinkedHashMap<FrameId, ()>,
    // Frames with at least k accesses, FIFO by the access that promoted
    // them past k (and each one after it).
    cold: LinkedHashMap<FrameId, ()>,
    evictable: usize,
}

/// LRU-K replacement in the FIFO-within-list variant: candidates below k
/// accesses are preferred victims in first-access order; candidates at or
/// above k follow in promotion order.
pub struct LruKReplacer {
    state: Mutex<LruKState>,
    k: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K needs k >= 1");
        Self {
            state: Mutex::new(LruKState {
                node_store: HashMap::with_capacity(num_frames),
                hot: LinkedHashMap::new(),
                cold: LinkedHashMap::new(),
                evictable: 0,
            }),
            k,
        }
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        let mut state = self.state.lock();
        let state = &mut *state;

        match state.node_store.get_mut(&frame_id) {
            None => {
                state.node_store.insert(
                    frame_id,
                    LruKNode {
                        access_count: 1,
                        is_evictable: false,
                    },
                );
                state.hot.insert(frame_id, ());
            }
            Some(node) => {
                node.access_count += 1;
                let promoted = node.access_count >= self.k;
                state.hot.remove(&frame_id);
                state.cold.remove(&frame_id);
                if promoted {
                    state.cold.insert(frame_id, ());
                } else {
                    state.hot.insert(frame_id, ());
                }
            }
        }
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock();
        let state = &mut *state;
        let Some(node) = state.node_store.get_mut(&frame_id) else {
            return;
        };
        if node.is_evictable == evictable {
            return;
        }
        node.is_evictable = evictable;
        if evictable {
            state.evictable += 1;
        } else {
            state.evictable -= 1;
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        let pick = |list: &LinkedHashMap<FrameId, ()>,
                    store: &HashMap<FrameId, LruKNode>| {
            list.keys()
                .copied()
                .find(|frame_id| store[frame_id].is_evictable)
        };

        let victim = pick(&state.hot, &state.node_store)
            .or_else(|| pick(&state.cold, &state.node_store))?;

        state.hot.remove(&victim);
        state.cold.remove(&victim);
        state.node_store.remove(&victim);
        state.evictable -= 1;
        Some(victim)
    }

    fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let Some(node) = state.node_store.remove(&frame_id) else {
            return;
        };
        if node.is_evictable {
            state.evictable -= 1;
        }
        state.hot.remove(&frame_id);
        state.cold.remove(&frame_id);
    }

    fn size(&self) -> usize {
        self.state.lock().evictable
    }
}

use parking_lot::Mutex;

use crate::common::{AccessType, FrameId};
use crate::utils::replacer::Replacer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockState {
    /// Not under consideration (untracked, or victimized).
    Out,
    /// Evictable on the next visit.
    Ready,
    /// Evictable, but entitled to one second chance.
    Referenced,
    /// In use; the hand skips it.
    Pinned,
}

struct ClockStateTable {
    slots: Vec<ClockState>,
    hand: usize,
    evictable: usize,
}

impl ClockStateTable {
    fn advance_hand(&mut self) {
        self.hand = (self.hand + 1) % self.slots.len();
    }
}

/// Second-chance clock replacement. A rotating hand downgrades `Referenced`
/// slots to `Ready` and victimizes the first `Ready` slot it lands on, so a
/// full revolution visits every slot exactly once.
pub struct ClockReplacer {
    state: Mutex<ClockStateTable>,
}

impl ClockReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            state: Mutex::new(ClockStateTable {
                slots: vec![ClockState::Out; num_frames],
                hand: 0,
                evictable: 0,
            }),
        }
    }
}

impl Replacer for ClockReplacer {
    fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        let mut state = self.state.lock();
        if frame_id >= state.slots.len() {
            return;
        }
        // Touching an evictable slot refreshes its second chance.
        if state.slots[frame_id] == ClockState::Ready {
            state.slots[frame_id] = ClockState::Referenced;
        }
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock();
        if frame_id >= state.slots.len() {
            return;
        }

        match (state.slots[frame_id], evictable) {
            (ClockState::Out, true) => {
                state.evictable += 1;
                state.slots[frame_id] = ClockState::Ready;
            }
            (ClockState::Pinned, true) => {
                state.evictable += 1;
                state.slots[frame_id] = ClockState::Referenced;
            }
            (ClockState::Ready | ClockState::Referenced, false) => {
                state.evictable -= 1;
                state.slots[frame_id] = ClockState::Pinned;
            }
            (ClockState::Out, false) => {
                state.slots[frame_id] = ClockState::Pinned;
            }
            // Already counted the way the caller asked for.
            _ => {}
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.evictable == 0 {
            return None;
        }

        loop {
            match state.slots[state.hand] {
                ClockState::Ready => {
                    let victim = state.hand;
                    state.slots[victim] = ClockState::Out;
                    state.evictable -= 1;
                    state.advance_hand();
                    return Some(victim);
                }
                ClockState::Referenced => {
                    let hand = state.hand;
                    state.slots[hand] = ClockState::Ready;
                    state.advance_hand();
                }
                _ => state.advance_hand(),
            }
        }
    }

    fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if frame_id >= state.slots.len() {
            return;
        }
        if matches!(
            state.slots[frame_id],
            ClockState::Ready | ClockState::Referenced
        ) {
            state.evictable -= 1;
        }
        state.slots[frame_id] = ClockState::Out;
    }

    fn size(&self) -> usize {
        self.state.lock().evictable
    }
}

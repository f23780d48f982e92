//! FIFO (first-in-first-out) page replacement policy (spec §2, §4.4).
//!
//! Ported from the teacher's `FifoReplacer`, generalized to order
//! candidates by `(priority, insertion sequence)` so lower-priority frames
//! are reclaimed first and ties break in arrival order. Re-accessing a
//! frame already tracked does NOT move it: that is what distinguishes FIFO
//! from LRU below.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{Priority, Replacer};
use crate::common::FrameId;

pub struct FifoReplacer {
    /// Ordered by (priority, sequence); lowest key evicted first.
    order: BTreeMap<(Priority, u64), FrameId>,
    /// Frame -> its key in `order`, so `remove`/`set_evictable` can find it.
    keys: HashMap<FrameId, (Priority, u64)>,
    evictable: HashSet<FrameId>,
    next_seq: u64,
}

impl FifoReplacer {
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
            keys: HashMap::new(),
            evictable: HashSet::new(),
            next_seq: 0,
        }
    }
}

impl Default for FifoReplacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Replacer for FifoReplacer {
    fn record_access(&mut self, frame_id: FrameId, priority: Priority) {
        if self.keys.contains_key(&frame_id) {
            return;
        }
        let key = (priority, self.next_seq);
        self.next_seq += 1;
        self.order.insert(key, frame_id);
        self.keys.insert(frame_id, key);
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if evictable {
            self.evictable.insert(frame_id);
        } else {
            self.evictable.remove(&frame_id);
        }
    }

    fn evict(&mut self) -> Option<FrameId> {
        let key = self
            .order
            .iter()
            .find(|(_, fid)| self.evictable.contains(fid))
            .map(|(k, _)| *k)?;
        let frame_id = self.order.remove(&key)?;
        self.keys.remove(&frame_id);
        self.evictable.remove(&frame_id);
        Some(frame_id)
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.evictable.remove(&frame_id);
        if let Some(key) = self.keys.remove(&frame_id) {
            self.order.remove(&key);
        }
    }

    fn size(&self) -> usize {
        self.evictable.len()
    }
}

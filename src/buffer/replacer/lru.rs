//! LRU (least-recently-used) page replacement policy (spec §2, §4.4).
//!
//! Structurally identical to [`super::fifo::FifoReplacer`] except
//! `record_access` always refreshes a tracked frame's position, so the
//! least-recently-touched frame among evictable ones is reclaimed first.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{Priority, Replacer};
use crate::common::FrameId;

pub struct LruReplacer {
    order: BTreeMap<(Priority, u64), FrameId>,
    keys: HashMap<FrameId, (Priority, u64)>,
    evictable: HashSet<FrameId>,
    next_seq: u64,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
            keys: HashMap::new(),
            evictable: HashSet::new(),
            next_seq: 0,
        }
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Replacer for LruReplacer {
    fn record_access(&mut self, frame_id: FrameId, priority: Priority) {
        if let Some(old_key) = self.keys.remove(&frame_id) {
            self.order.remove(&old_key);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let mut r = LruReplacer::new();
        r.record_access(FrameId::new(0), Priority::NORMAL);
        r.record_access(FrameId::new(1), Priority::NORMAL);
        r.record_access(FrameId::new(2), Priority::NORMAL);
        r.set_evictable(FrameId::new(0), true);
        r.set_evictable(FrameId::new(1), true);
        r.set_evictable(FrameId::new(2), true);

        // Touch frame 0 again: it should no longer be the LRU victim.
        r.record_access(FrameId::new(0), Priority::NORMAL);

        assert_eq!(r.evict(), Some(FrameId::new(1)));
        assert_eq!(r.evict(), Some(FrameId::new(2)));
        assert_eq!(r.evict(), Some(FrameId::new(0)));
    }

    #[test]
    fn test_lru_skips_pinned() {
        let mut r = LruReplacer::new();
        r.record_access(FrameId::new(0), Priority::NORMAL);
        r.record_access(FrameId::new(1), Priority::NORMAL);
        r.set_evictable(FrameId::new(1), true);
        assert_eq!(r.evict(), Some(FrameId::new(1)));
        assert_eq!(r.evict(), None);
    }

    #[test]
    fn test_lru_priority_beats_recency() {
        let mut r = LruReplacer::new();
        r.record_access(FrameId::new(0), Priority::NORMAL);
        r.record_access(FrameId::new(1), Priority::LOW);
        r.set_evictable(FrameId::new(0), true);
        r.set_evictable(FrameId::new(1), true);
        // frame 1 is more recently touched but lower priority, evicted first.
        assert_eq!(r.evict(), Some(FrameId::new(1)));
    }

    #[test]
    fn test_lru_remove() {
        let mut r = LruReplacer::new();
        r.record_access(FrameId::new(0), Priority::NORMAL);
        r.record_access(FrameId::new(1), Priority::NORMAL);
        r.set_evictable(FrameId::new(0), true);
        r.set_evictable(FrameId::new(1), true);
        r.remove(FrameId::new(1));
        assert_eq!(r.evict(), Some(FrameId::new(0)));
        assert_eq!(r.evict(), None);
    }
}

//! Step-indexed frame cache with a retention window.
//!
//! Slots below `latest - retention` are reduced to tombstones: the step is
//! known to exist but its frame has to be fetched again from the service's
//! old-data endpoint.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::frame::Frame;
use crate::logging::log_eviction;

#[derive(Debug, Clone, Default)]
enum Slot {
    #[default]
    Absent,
    Tombstone,
    Frame(Arc<Frame>),
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    Frame(Arc<Frame>),
    Tombstone,
    Absent,
}

impl Lookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lookup::Frame(_) => "frame",
            Lookup::Tombstone => "tombstone",
            Lookup::Absent => "absent",
        }
    }
}

#[derive(Debug)]
pub struct HistoryStore {
    slots: Vec<Slot>,
    latest: u64,
    retention: u64,
    /// Every step below this has already been through an eviction pass.
    evicted_below: u64,
    /// Frames sitting below `evicted_below` (rehydrated or late puts).
    strays: BTreeSet<u64>,
}

impl HistoryStore {
    pub fn new(retention: u64) -> Self {
        Self {
            slots: Vec::new(),
            latest: 0,
            retention,
            evicted_below: 0,
            strays: BTreeSet::new(),
        }
    }

    pub fn latest(&self) -> u64 {
        self.latest
    }

    pub fn retention(&self) -> u64 {
        self.retention
    }

    /// Lowest step still guaranteed to be kept as a full frame.
    pub fn horizon(&self) -> u64 {
        self.latest.saturating_sub(self.retention)
    }

    pub fn get(&self, step: u64) -> Lookup {
        match self.slots.get(step as usize) {
            Some(Slot::Frame(frame)) => Lookup::Frame(Arc::clone(frame)),
            Some(Slot::Tombstone) => Lookup::Tombstone,
            Some(Slot::Absent) | None => Lookup::Absent,
        }
    }

    /// Number of slots currently holding a full frame.
    pub fn resident(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, Slot::Frame(_))).count()
    }

    /// Store a confirmed frame, advance the frontier and evict.
    ///
    /// Steps skipped on the way to a new frontier were produced by the
    /// service without being fetched; they become tombstones.
    pub fn put(&mut self, step: u64, frame: Arc<Frame>) {
        self.ensure_len(step);
        self.slots[step as usize] = Slot::Frame(frame);

        if step > self.latest {
            for s in (self.latest + 1).max(1)..step {
                let slot = &mut self.slots[s as usize];
                if matches!(slot, Slot::Absent) {
                    *slot = Slot::Tombstone;
                }
            }
            self.latest = step;
        } else if step < self.evicted_below {
            self.strays.insert(step);
        }
        self.evict();
    }

    /// Fill an evicted slot for a single read. Does not move the frontier;
    /// any frame rehydrated earlier below the horizon is dropped first, so
    /// replaying old history keeps at most one extra frame resident.
    /// Returns false when the step was never observed.
    pub fn rehydrate(&mut self, step: u64, frame: Arc<Frame>) -> bool {
        match self.slots.get(step as usize) {
            None | Some(Slot::Absent) => return false,
            Some(_) => {}
        }
        self.drop_strays(self.horizon());
        self.slots[step as usize] = Slot::Frame(frame);
        if step < self.evicted_below {
            self.strays.insert(step);
        }
        true
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.strays.clear();
        self.latest = 0;
        self.evicted_below = 0;
    }

    fn ensure_len(&mut self, step: u64) {
        let needed = step as usize + 1;
        if self.slots.len() < needed {
            self.slots.resize(needed, Slot::Absent);
        }
    }

    fn evict(&mut self) {
        let horizon = self.horizon();
        let mut evicted = 0;
        for step in self.evicted_below..horizon {
            if self.tombstone(step) {
                evicted += 1;
            }
        }
        evicted += self.drop_strays(horizon);
        self.evicted_below = self.evicted_below.max(horizon);

        if evicted > 0 {
            log_eviction(horizon, evicted);
        }
    }

    /// Tombstone every stray frame below `horizon`.
    fn drop_strays(&mut self, horizon: u64) -> usize {
        let strays: Vec<u64> = self.strays.range(..horizon).copied().collect();
        let mut dropped = 0;
        for step in strays {
            self.strays.remove(&step);
            if self.tombstone(step) {
                dropped += 1;
            }
        }
        dropped
    }

    fn tombstone(&mut self, step: u64) -> bool {
        let Some(slot) = self.slots.get_mut(step as usize) else {
            return false;
        };
        if !matches!(slot, Slot::Frame(_)) {
            return false;
        }
        *slot = Slot::Tombstone;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::sample_frame;

    fn frame(step: u64) -> Arc<Frame> {
        Arc::new(sample_frame(step, &["S", "IU"]))
    }

    fn fill(store: &mut HistoryStore, upto: u64) {
        for s in 1..=upto {
            store.put(s, frame(s));
        }
    }

    #[test]
    fn test_never_seen_is_absent() {
        let store = HistoryStore::new(10);
        assert!(matches!(store.get(1), Lookup::Absent));
        assert!(matches!(store.get(0), Lookup::Absent));
    }

    #[test]
    fn test_eviction_leaves_tombstone() {
        let mut store = HistoryStore::new(10);
        fill(&mut store, 15);
        assert!(matches!(store.get(4), Lookup::Tombstone));
        assert!(matches!(store.get(5), Lookup::Frame(_)));
        assert!(matches!(store.get(15), Lookup::Frame(_)));
        assert_eq!(store.latest(), 15);
        assert_eq!(store.resident(), 11);
    }

    #[test]
    fn test_jump_ahead_marks_skipped_steps_known() {
        let mut store = HistoryStore::new(10);
        store.put(15, frame(15));
        for s in 1..15 {
            assert!(!matches!(store.get(s), Lookup::Absent), "step {} absent", s);
        }
        assert!(matches!(store.get(4), Lookup::Tombstone));
        assert!(matches!(store.get(16), Lookup::Absent));
    }

    #[test]
    fn test_rehydrate_does_not_move_frontier() {
        let mut store = HistoryStore::new(10);
        fill(&mut store, 15);
        assert!(store.rehydrate(2, frame(2)));
        assert!(matches!(store.get(2), Lookup::Frame(_)));
        assert_eq!(store.latest(), 15);

        // the next put drops it again
        store.put(16, frame(16));
        assert!(matches!(store.get(2), Lookup::Tombstone));
    }

    #[test]
    fn test_rehydrate_drops_previous_rehydrated_frame() {
        let mut store = HistoryStore::new(3);
        fill(&mut store, 20);
        assert_eq!(store.retention(), 3);
        assert_eq!(store.resident(), 4);

        for s in 1..=10 {
            assert!(store.rehydrate(s, frame(s)));
            assert!(matches!(store.get(s), Lookup::Frame(_)));
            assert_eq!(store.resident(), 5);
        }
        assert!(matches!(store.get(9), Lookup::Tombstone));
        assert_eq!(store.latest(), 20);
    }

    #[test]
    fn test_rehydrate_unknown_step_is_rejected() {
        let mut store = HistoryStore::new(10);
        fill(&mut store, 3);
        assert!(!store.rehydrate(9, frame(9)));
        assert!(matches!(store.get(9), Lookup::Absent));
    }

    #[test]
    fn test_late_put_below_horizon_is_evicted() {
        let mut store = HistoryStore::new(5);
        store.put(20, frame(20));
        store.put(3, frame(3));
        assert!(matches!(store.get(3), Lookup::Tombstone));
        assert_eq!(store.latest(), 20);
    }

    #[test]
    fn test_late_put_inside_window_is_kept() {
        let mut store = HistoryStore::new(24);
        store.put(10, frame(10));
        store.put(3, frame(3));
        assert!(matches!(store.get(3), Lookup::Frame(_)));
        assert_eq!(store.latest(), 10);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut store = HistoryStore::new(10);
        fill(&mut store, 12);
        store.clear();
        assert_eq!(store.latest(), 0);
        assert!(matches!(store.get(1), Lookup::Absent));
        assert_eq!(store.resident(), 0);
    }
}

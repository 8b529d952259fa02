// ABOUTME: Tracks rooms with in-memory changes that have not reached disk yet.
// ABOUTME: Marking is synchronous; draining is an atomic take-and-clear handed to the background worker.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Everything a single commit has to persist.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirtyBatch {
    pub messages: Vec<String>,
    pub states: Vec<String>,
    pub summaries: Vec<String>,
    pub metadata: bool,
}

impl DirtyBatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.states.is_empty()
            && self.summaries.is_empty()
            && !self.metadata
    }
}

#[derive(Debug, Default)]
struct DirtySets {
    messages: HashSet<String>,
    states: HashSet<String>,
    summaries: HashSet<String>,
    metadata: bool,
}

/// The three dirty-room sets plus the metadata flag, behind one lock so a
/// drain sees a consistent cut.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    sets: Mutex<DirtySets>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_messages(&self, room_id: &str) {
        self.sets.lock().messages.insert(room_id.to_string());
    }

    pub fn mark_state(&self, room_id: &str) {
        self.sets.lock().states.insert(room_id.to_string());
    }

    pub fn mark_summary(&self, room_id: &str) {
        self.sets.lock().summaries.insert(room_id.to_string());
    }

    pub fn mark_metadata(&self) {
        self.sets.lock().metadata = true;
    }

    /// Forget a room entirely, e.g. after it was deleted.
    pub fn forget(&self, room_id: &str) {
        let mut sets = self.sets.lock();
        sets.messages.remove(room_id);
        sets.states.remove(room_id);
        sets.summaries.remove(room_id);
    }

    pub fn clear(&self) {
        *self.sets.lock() = DirtySets::default();
    }

    /// Swap every set for an empty one and return what was pending.
    pub fn take(&self) -> DirtyBatch {
        let sets = std::mem::take(&mut *self.sets.lock());
        DirtyBatch {
            messages: sorted(sets.messages),
            states: sorted(sets.states),
            summaries: sorted(sets.summaries),
            metadata: sets.metadata,
        }
    }

    /// Drain only the summaries set, for immediate summary flushes.
    pub fn take_summaries(&self) -> Vec<String> {
        sorted(std::mem::take(&mut self.sets.lock().summaries))
    }

    /// A copy of what is pending, without draining.
    pub fn pending(&self) -> DirtyBatch {
        let sets = self.sets.lock();
        DirtyBatch {
            messages: sorted(sets.messages.clone()),
            states: sorted(sets.states.clone()),
            summaries: sorted(sets.summaries.clone()),
            metadata: sets.metadata,
        }
    }
}

fn sorted(set: HashSet<String>) -> Vec<String> {
    let mut rooms: Vec<String> = set.into_iter().collect();
    rooms.sort();
    rooms
}

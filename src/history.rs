//! Trajectory storage.
//!
//! Every simulated trajectory is persisted as a [`HistorySequence`] so that
//! its contribution to the tree statistics can be un-applied and replayed
//! when the model changes. Sequences live in a slab keyed by stable ids;
//! entries are addressed by [`EntryRef`] (sequence id plus position).

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::changes::ChangeFlags;
use crate::types::{NodeId, SeqId, StateId};

/// Address of one history entry.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntryRef {
    pub seq: SeqId,
    pub index: usize,
}

/// One step of one simulated trajectory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry<A, O, T> {
    /// Canonical state at this step.
    pub state: StateId,
    /// Discount factor applying at this depth.
    pub discount: f64,
    pub reward: f64,
    /// Action taken here; `None` on the frontier entry.
    pub action: Option<A>,
    pub observation: Option<O>,
    /// Opaque transition parameters from the model.
    pub transition: Option<T>,
    /// Belief node owning this particle.
    pub node: NodeId,
    /// Cached discounted return of the trajectory suffix starting here.
    pub total_discounted_reward: f64,
    pub has_been_backed_up: bool,
    pub change_flags: ChangeFlags,
}

impl<A, O, T> HistoryEntry<A, O, T> {
    fn new(state: StateId, discount: f64, node: NodeId) -> Self {
        HistoryEntry {
            state,
            discount,
            reward: 0.0,
            action: None,
            observation: None,
            transition: None,
            node,
            total_discounted_reward: 0.0,
            has_been_backed_up: false,
            change_flags: ChangeFlags::UNCHANGED,
        }
    }
}

/// An ordered, non-empty run of history entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistorySequence<A, O, T> {
    id: SeqId,
    pub start_depth: u64,
    pub entries: Vec<HistoryEntry<A, O, T>>,
    pub is_terminal: bool,
    /// First entry whose belief-node link may be stale, set by revision.
    pub invalid_links_start: Option<usize>,
}

impl<A, O, T> HistorySequence<A, O, T> {
    pub fn id(&self) -> SeqId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry. The belief-node link is registered by the caller.
    pub fn add_entry(&mut self, state: StateId, discount: f64, node: NodeId) -> usize {
        self.entries.push(HistoryEntry::new(state, discount, node));
        self.entries.len() - 1
    }

    pub fn last_entry(&self) -> &HistoryEntry<A, O, T> {
        self.entries.last().expect("history sequence is never empty")
    }

    /// Union flags into the entry at `index`.
    pub fn set_change_flags(&mut self, index: usize, flags: ChangeFlags) {
        self.entries[index].change_flags |= flags;
    }

    pub fn reset_change_flags(&mut self) {
        for entry in &mut self.entries {
            entry.change_flags.clear();
        }
    }

    /// Index of the earliest entry carrying a change flag.
    pub fn first_affected_entry(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.change_flags.is_empty())
    }
}

/// Owns all history sequences.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Histories<A, O, T> {
    slots: Vec<Option<HistorySequence<A, O, T>>>,
    active: usize,
}

impl<A, O, T> Histories<A, O, T> {
    pub fn new() -> Self {
        Histories {
            slots: Vec::new(),
            active: 0,
        }
    }

    /// Number of live sequences.
    pub fn len(&self) -> usize {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    pub fn add_new(&mut self, start_depth: u64) -> SeqId {
        let id = self.slots.len();
        self.slots.push(Some(HistorySequence {
            id,
            start_depth,
            entries: Vec::new(),
            is_terminal: false,
            invalid_links_start: None,
        }));
        self.active += 1;
        id
    }

    pub fn get(&self, id: SeqId) -> Option<&HistorySequence<A, O, T>> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: SeqId) -> Option<&mut HistorySequence<A, O, T>> {
        self.slots.get_mut(id).and_then(|s| s.as_mut())
    }

    /// Reclaim a sequence's storage. The caller must have deregistered every
    /// entry's state back-reference and belief-node particle link first.
    pub fn remove(&mut self, id: SeqId) -> Option<HistorySequence<A, O, T>> {
        let removed = self.slots.get_mut(id).and_then(|s| s.take());
        if removed.is_some() {
            self.active -= 1;
        }
        removed
    }

    /// Live sequences in id order.
    pub fn iter(&self) -> impl Iterator<Item = &HistorySequence<A, O, T>> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn entry(&self, r: EntryRef) -> &HistoryEntry<A, O, T> {
        &self[r.seq].entries[r.index]
    }

    pub fn entry_mut(&mut self, r: EntryRef) -> &mut HistoryEntry<A, O, T> {
        &mut self[r.seq].entries[r.index]
    }

    pub(crate) fn slots(&self) -> &[Option<HistorySequence<A, O, T>>] {
        &self.slots
    }

    pub(crate) fn from_slots(slots: Vec<Option<HistorySequence<A, O, T>>>) -> Self {
        let active = slots.iter().filter(|s| s.is_some()).count();
        Histories { slots, active }
    }
}

impl<A, O, T> Index<SeqId> for Histories<A, O, T> {
    type Output = HistorySequence<A, O, T>;

    fn index(&self, id: SeqId) -> &HistorySequence<A, O, T> {
        self.slots[id]
            .as_ref()
            .expect("indexed a deleted history sequence")
    }
}

impl<A, O, T> IndexMut<SeqId> for Histories<A, O, T> {
    fn index_mut(&mut self, id: SeqId) -> &mut HistorySequence<A, O, T> {
        self.slots[id]
            .as_mut()
            .expect("indexed a deleted history sequence")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type H = Histories<usize, usize, ()>;

    #[test]
    fn test_add_and_remove() {
        let mut histories = H::new();
        let a = histories.add_new(0);
        let b = histories.add_new(3);
        assert_eq!(histories.len(), 2);
        assert_eq!(histories[b].start_depth, 3);

        histories[a].add_entry(0, 1.0, 0);
        histories[a].add_entry(1, 0.95, 1);
        assert_eq!(histories[a].len(), 2);

        let removed = histories.remove(a).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(histories.len(), 1);
        assert!(histories.get(a).is_none());
        // Ids are stable: b still resolves
        assert_eq!(histories[b].id(), b);
    }

    #[test]
    fn test_change_flag_propagation() {
        let mut histories = H::new();
        let id = histories.add_new(0);
        histories[id].add_entry(0, 1.0, 0);
        histories[id].add_entry(1, 0.9, 1);
        histories[id].add_entry(2, 0.81, 2);

        assert_eq!(histories[id].first_affected_entry(), None);
        histories[id].set_change_flags(2, ChangeFlags::DELETED);
        histories[id].set_change_flags(1, ChangeFlags::TRANSITION);
        assert_eq!(histories[id].first_affected_entry(), Some(1));

        histories[id].reset_change_flags();
        assert_eq!(histories[id].first_affected_entry(), None);
    }

    #[test]
    fn test_entry_ref_access() {
        let mut histories = H::new();
        let id = histories.add_new(0);
        histories[id].add_entry(5, 1.0, 0);
        let r = EntryRef { seq: id, index: 0 };
        assert_eq!(histories.entry(r).state, 5);
        histories.entry_mut(r).reward = 2.5;
        assert_eq!(histories.entry(r).reward, 2.5);
    }
}

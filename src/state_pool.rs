//! Canonical state storage with change tracking and spatial indexing.
//!
//! Every state sampled anywhere in the planner is canonicalized through the
//! pool: two equal states share one [`StateInfo`] record. Each record keeps
//! the set of history entries referencing it, so a model change that touches
//! a state can be propagated to every trajectory that passed through it.

use std::collections::{BTreeSet, HashMap};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::changes::ChangeFlags;
use crate::history::EntryRef;
use crate::types::{State, StateId};

/// Spatial index over state vectors, for range queries by the model.
pub trait StateIndex: Send {
    fn add(&mut self, id: StateId, vector: &Array1<f64>);
    fn remove(&mut self, id: StateId);
    /// All ids whose vector lies inside the closed box `[lo, hi]`.
    fn box_query(&self, lo: &Array1<f64>, hi: &Array1<f64>) -> Vec<StateId>;
}

/// Linear-scan index. Adequate for the state counts a single episode
/// produces; models with heavier query loads supply their own index.
#[derive(Default)]
pub struct VectorIndex {
    entries: Vec<(StateId, Array1<f64>)>,
}

impl VectorIndex {
    pub fn new() -> Self {
        VectorIndex::default()
    }
}

impl StateIndex for VectorIndex {
    fn add(&mut self, id: StateId, vector: &Array1<f64>) {
        self.entries.push((id, vector.clone()));
    }

    fn remove(&mut self, id: StateId) {
        if let Some(pos) = self.entries.iter().position(|(i, _)| *i == id) {
            self.entries.swap_remove(pos);
        }
    }

    fn box_query(&self, lo: &Array1<f64>, hi: &Array1<f64>) -> Vec<StateId> {
        let mut hits: Vec<StateId> = self
            .entries
            .iter()
            .filter(|(_, v)| {
                v.iter()
                    .zip(lo.iter())
                    .zip(hi.iter())
                    .all(|((x, l), h)| *x >= *l && *x <= *h)
            })
            .map(|(id, _)| *id)
            .collect();
        hits.sort_unstable();
        hits
    }
}

/// Canonical record for one state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateInfo<S> {
    state: S,
    id: StateId,
    pub change_flags: ChangeFlags,
    used_in_history_entries: BTreeSet<EntryRef>,
}

impl<S> StateInfo<S> {
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    /// The history entries whose particle is this state.
    pub fn referencing_entries(&self) -> impl Iterator<Item = &EntryRef> {
        self.used_in_history_entries.iter()
    }
}

/// Owns all [`StateInfo`] records and the affected-state set.
pub struct StatePool<S: State> {
    infos: Vec<StateInfo<S>>,
    lookup: HashMap<S, StateId>,
    affected: BTreeSet<StateId>,
    index: Box<dyn StateIndex>,
}

impl<S: State> StatePool<S> {
    pub fn new(index: Box<dyn StateIndex>) -> Self {
        StatePool {
            infos: Vec::new(),
            lookup: HashMap::new(),
            affected: BTreeSet::new(),
            index,
        }
    }

    /// Idempotent canonicalization: equal states map to the same record.
    pub fn create_or_get_info(&mut self, state: S) -> StateId {
        if let Some(&id) = self.lookup.get(&state) {
            return id;
        }
        let id = self.infos.len();
        self.index.add(id, &state.as_vector());
        self.lookup.insert(state.clone(), id);
        self.infos.push(StateInfo {
            state,
            id,
            change_flags: ChangeFlags::UNCHANGED,
            used_in_history_entries: BTreeSet::new(),
        });
        id
    }

    pub fn get(&self, id: StateId) -> &StateInfo<S> {
        &self.infos[id]
    }

    pub fn state(&self, id: StateId) -> &S {
        &self.infos[id].state
    }

    pub fn info_of(&self, state: &S) -> Option<&StateInfo<S>> {
        self.lookup.get(state).map(|&id| &self.infos[id])
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Union `flags` into the state's record and remember it as affected.
    pub fn flag_affected(&mut self, id: StateId, flags: ChangeFlags) {
        let info = &mut self.infos[id];
        info.change_flags |= flags;
        if !info.change_flags.is_empty() {
            self.affected.insert(id);
        }
    }

    /// Ids of states whose change flags are non-zero, in id order.
    pub fn affected_states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.affected.iter().copied()
    }

    /// Clear the affected set and the flags of every state in it.
    pub fn reset_affected_states(&mut self) {
        for &id in &self.affected {
            self.infos[id].change_flags.clear();
        }
        self.affected.clear();
    }

    pub fn register_entry(&mut self, id: StateId, entry: EntryRef) {
        self.infos[id].used_in_history_entries.insert(entry);
    }

    pub fn deregister_entry(&mut self, id: StateId, entry: EntryRef) {
        self.infos[id].used_in_history_entries.remove(&entry);
    }

    pub fn box_query(&self, lo: &Array1<f64>, hi: &Array1<f64>) -> Vec<StateId> {
        self.index.box_query(lo, hi)
    }

    pub(crate) fn infos(&self) -> &[StateInfo<S>] {
        &self.infos
    }

    /// Rebuild a pool from serialized records, re-deriving the lookup table
    /// and re-populating the index.
    pub(crate) fn from_infos(infos: Vec<StateInfo<S>>, mut index: Box<dyn StateIndex>) -> Self {
        let mut lookup = HashMap::with_capacity(infos.len());
        let mut affected = BTreeSet::new();
        for info in &infos {
            index.add(info.id, &info.state.as_vector());
            lookup.insert(info.state.clone(), info.id);
            if !info.change_flags.is_empty() {
                affected.insert(info.id);
            }
        }
        StatePool {
            infos,
            lookup,
            affected,
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
    struct P(i64, i64);

    impl State for P {
        fn as_vector(&self) -> Array1<f64> {
            array![self.0 as f64, self.1 as f64]
        }
    }

    fn pool() -> StatePool<P> {
        StatePool::new(Box::new(VectorIndex::new()))
    }

    #[test]
    fn test_canonicalization_is_idempotent() {
        let mut pool = pool();
        let a = pool.create_or_get_info(P(1, 2));
        let b = pool.create_or_get_info(P(1, 2));
        let c = pool.create_or_get_info(P(3, 4));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_affected_tracking() {
        let mut pool = pool();
        let a = pool.create_or_get_info(P(0, 0));
        let b = pool.create_or_get_info(P(5, 5));
        pool.flag_affected(b, ChangeFlags::DELETED);
        pool.flag_affected(a, ChangeFlags::REWARD);

        let affected: Vec<_> = pool.affected_states().collect();
        assert_eq!(affected, vec![a, b]);
        assert!(pool.get(b).change_flags.contains(ChangeFlags::DELETED));

        pool.reset_affected_states();
        assert_eq!(pool.affected_states().count(), 0);
        assert!(pool.get(b).change_flags.is_empty());
    }

    #[test]
    fn test_entry_registration() {
        let mut pool = pool();
        let id = pool.create_or_get_info(P(2, 2));
        let entry = EntryRef { seq: 3, index: 1 };
        pool.register_entry(id, entry);
        assert_eq!(pool.get(id).referencing_entries().count(), 1);
        pool.deregister_entry(id, entry);
        assert_eq!(pool.get(id).referencing_entries().count(), 0);
    }

    #[test]
    fn test_box_query() {
        let mut pool = pool();
        let a = pool.create_or_get_info(P(1, 1));
        let _b = pool.create_or_get_info(P(9, 9));
        let c = pool.create_or_get_info(P(2, 3));

        let hits = pool.box_query(&array![0.0, 0.0], &array![4.0, 4.0]);
        assert_eq!(hits, vec![a, c]);
    }
}

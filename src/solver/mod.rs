//! # Search Engine
//!
//! The solver owns every planner component: the state pool, the history
//! store, the belief tree, the legal-actions pool, the rollout coordinator,
//! and the deterministic generator. All cross-component references are
//! integer ids, so ownership stays unidirectional; the belief-node /
//! history-entry particle link is the one cyclic relationship and is
//! maintained through the registration helpers here.
//!
//! The driver itself is split across submodules:
//!
//! - [`search`] - UCB descent, backup, and undo-backup
//! - [`rollout`] - the dual-mode rollout and its adaptive mixture
//! - [`change`] - history repair after model mutation

pub mod change;
pub mod rollout;
pub mod search;

use std::collections::BTreeSet;

use rand::SeedableRng;

use crate::error::{PlannerError, Result};
use crate::history::{Histories, EntryRef};
use crate::belief::BeliefTree;
use crate::mappings::{ActionMapping, LegalActionsPool};
use crate::model::Model;
use crate::state_pool::StatePool;
use crate::types::{Action, NodeId, SeqId, StateId};
use crate::PlannerRng;

use rollout::RolloutCoordinator;

pub(crate) type HistoriesOf<M> = Histories<
    <M as Model>::Action,
    <M as Model>::Observation,
    <M as Model>::TransitionParams,
>;

pub(crate) type TreeOf<M> = BeliefTree<<M as Model>::Observation, <M as Model>::LegalityKey>;

/// The belief-tree search engine.
pub struct Solver<M: Model> {
    pub(crate) model: M,
    /// The action set in canonical order, cached from the model.
    pub(crate) actions: Vec<M::Action>,
    pub(crate) pool: StatePool<M::State>,
    pub(crate) histories: HistoriesOf<M>,
    pub(crate) tree: TreeOf<M>,
    pub(crate) legal_pool: LegalActionsPool<M::LegalityKey>,
    pub(crate) rollout: RolloutCoordinator,
    pub(crate) rng: PlannerRng,
}

impl<M: Model> Solver<M> {
    /// Build a solver around a model, seeding the deterministic generator.
    pub fn new(model: M, seed: u64) -> Result<Self> {
        let actions = model.all_actions();
        for (i, action) in actions.iter().enumerate() {
            if action.index() != i {
                return Err(PlannerError::ModelInconsistency(format!(
                    "action at position {} reports index {}",
                    i,
                    action.index()
                )));
            }
        }

        let pool = StatePool::new(model.create_state_index());
        let root_key = model.root_legality_key();
        let root_map = ActionMapping::with_legality(model.action_legality(root_key.as_ref()));
        let tree = BeliefTree::new(root_map, root_key.clone());
        let mut legal_pool = LegalActionsPool::new();
        if let Some(key) = root_key {
            legal_pool.register(key, 0);
        }
        let rollout = RolloutCoordinator::new(model.heuristic_explore_coefficient());

        Ok(Solver {
            model,
            actions,
            pool,
            histories: Histories::new(),
            tree,
            legal_pool,
            rollout,
            rng: PlannerRng::seed_from_u64(seed),
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn tree(&self) -> &TreeOf<M> {
        &self.tree
    }

    pub fn histories(&self) -> &HistoriesOf<M> {
        &self.histories
    }

    pub fn pool(&self) -> &StatePool<M::State> {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut StatePool<M::State> {
        &mut self.pool
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn rng_mut(&mut self) -> &mut PlannerRng {
        &mut self.rng
    }

    /// The action value for an index in the canonical ordering.
    pub fn action(&self, index: usize) -> &M::Action {
        &self.actions[index]
    }

    /// The recommended action at a node, by highest mean Q.
    pub fn recommended_action(&self, node: NodeId) -> Option<M::Action> {
        self.tree
            .node(node)
            .action_map
            .recommended_action()
            .map(|i| self.actions[i].clone())
    }

    /// Resolve or create the child belief node under (action, observation).
    ///
    /// A freshly created node derives its legality key from the parent's
    /// and is registered with the legal-actions pool.
    pub fn create_or_get_child(
        &mut self,
        parent: NodeId,
        action: usize,
        obs: &M::Observation,
    ) -> NodeId {
        if let Some(child) = self.tree.get_child(parent, action, obs) {
            return child;
        }
        let parent_key = self.tree.node(parent).legality_key.clone();
        let key = self
            .model
            .child_legality_key(parent_key.as_ref(), &self.actions[action], obs);
        let action_map = ActionMapping::with_legality(self.model.action_legality(key.as_ref()));
        let child = self.tree.add_child(
            parent,
            action,
            obs.clone(),
            action_map,
            key.clone(),
            self.model.max_observation_distance(),
        );
        if let Some(key) = key {
            self.legal_pool.register(key, child);
        }
        child
    }

    /// Register a history entry as a particle of `node`, wiring the state
    /// back-reference and the node's particle list.
    pub(crate) fn register_entry(&mut self, entry: EntryRef, node: NodeId) {
        let state = {
            let e = self.histories.entry_mut(entry);
            e.node = node;
            e.state
        };
        self.pool.register_entry(state, entry);
        self.tree.add_particle(node, entry);
    }

    /// Move a particle to a different belief node.
    pub(crate) fn reassign_entry_node(&mut self, entry: EntryRef, node: NodeId) {
        let old = self.histories.entry(entry).node;
        if old == node {
            return;
        }
        self.tree.remove_particle(old, entry);
        self.histories.entry_mut(entry).node = node;
        self.tree.add_particle(node, entry);
    }

    /// Swap the canonical state a history entry points at.
    pub(crate) fn set_entry_state(&mut self, entry: EntryRef, state: StateId) {
        let old = self.histories.entry(entry).state;
        if old == state {
            return;
        }
        self.pool.deregister_entry(old, entry);
        self.histories.entry_mut(entry).state = state;
        self.pool.register_entry(state, entry);
    }

    /// Delete a sequence, de-registering every entry's state back-reference
    /// and belief-node particle link before its storage is reclaimed.
    pub(crate) fn delete_sequence(&mut self, seq: SeqId) {
        let links: Vec<(StateId, NodeId)> = match self.histories.get(seq) {
            Some(sequence) => sequence.entries.iter().map(|e| (e.state, e.node)).collect(),
            None => return,
        };
        for (index, (state, node)) in links.into_iter().enumerate() {
            let entry = EntryRef { seq, index };
            self.pool.deregister_entry(state, entry);
            self.tree.remove_particle(node, entry);
        }
        self.histories.remove(seq);
    }

    /// Verify the two back-reference invariants: a state's entry set equals
    /// the entries that point at it, and a node's particle list equals the
    /// entries that registered it.
    pub fn check_consistency(&self) -> Result<()> {
        let mut by_state: Vec<BTreeSet<EntryRef>> = vec![BTreeSet::new(); self.pool.len()];
        let mut by_node: Vec<BTreeSet<EntryRef>> = vec![BTreeSet::new(); self.tree.len()];
        for sequence in self.histories.iter() {
            for (index, entry) in sequence.entries.iter().enumerate() {
                let r = EntryRef {
                    seq: sequence.id(),
                    index,
                };
                by_state[entry.state].insert(r);
                by_node[entry.node].insert(r);
            }
        }
        for id in 0..self.pool.len() {
            let registered: BTreeSet<EntryRef> =
                self.pool.get(id).referencing_entries().copied().collect();
            if registered != by_state[id] {
                return Err(PlannerError::invariant(format!(
                    "state {} back-references are incomplete",
                    id
                )));
            }
        }
        for id in self.tree.all_nodes() {
            let particles: BTreeSet<EntryRef> =
                self.tree.node(id).particles().iter().copied().collect();
            if particles != by_node[id] {
                return Err(PlannerError::invariant(format!(
                    "node {} particle list does not match its registered entries",
                    id
                )));
            }
        }
        Ok(())
    }
}

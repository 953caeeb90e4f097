//! Snapshot save/restore.
//!
//! A snapshot captures everything the planner needs to resume: the state
//! pool, the histories, the belief tree with its statistics, the rollout
//! mixture, and the full stream state of the deterministic generator. The
//! model itself is not captured; it is reconstructed from configuration and
//! paired with the snapshot on restore.
//!
//! Snapshots are deterministic: serializing a restored snapshot yields the
//! original bytes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::belief::{BeliefNode, BeliefTree};
use crate::history::{Histories, HistorySequence};
use crate::mappings::LegalActionsPool;
use crate::model::Model;
use crate::solver::rollout::RolloutCoordinator;
use crate::solver::Solver;
use crate::state_pool::{StateInfo, StatePool};
use crate::error::Result;
use crate::PlannerRng;

type SequenceOf<M> = HistorySequence<
    <M as Model>::Action,
    <M as Model>::Observation,
    <M as Model>::TransitionParams,
>;

/// Complete persisted planner state.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
pub struct SolverSnapshot<M: Model> {
    states: Vec<StateInfo<M::State>>,
    sequences: Vec<Option<SequenceOf<M>>>,
    nodes: Vec<BeliefNode<M::Observation, M::LegalityKey>>,
    tree_tick: i64,
    legal_pool: LegalActionsPool<M::LegalityKey>,
    rollout: RolloutCoordinator,
    rng: PlannerRng,
}

impl<M: Model> Solver<M> {
    /// Capture the current planner state.
    pub fn snapshot(&self) -> SolverSnapshot<M> {
        SolverSnapshot {
            states: self.pool.infos().to_vec(),
            sequences: self.histories.slots().to_vec(),
            nodes: self.tree.nodes().to_vec(),
            tree_tick: self.tree.tick(),
            legal_pool: self.legal_pool.clone(),
            rollout: self.rollout.clone(),
            rng: self.rng.clone(),
        }
    }

    /// Rebuild a solver from a snapshot and a freshly constructed model.
    ///
    /// The state lookup table and the spatial index are re-derived from the
    /// snapshot contents; the model must be configured identically to the
    /// one that produced the snapshot.
    pub fn restore(model: M, snapshot: SolverSnapshot<M>) -> Result<Self> {
        let actions = model.all_actions();
        let pool = StatePool::from_infos(snapshot.states, model.create_state_index());
        Ok(Solver {
            model,
            actions,
            pool,
            histories: Histories::from_slots(snapshot.sequences),
            tree: BeliefTree::from_parts(snapshot.nodes, snapshot.tree_tick),
            legal_pool: snapshot.legal_pool,
            rollout: snapshot.rollout,
            rng: snapshot.rng,
        })
    }

    /// Serialize a snapshot to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = bincode::serialize(&self.snapshot())?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Restore a solver from a snapshot file.
    pub fn load<P: AsRef<Path>>(model: M, path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        let snapshot: SolverSnapshot<M> = bincode::deserialize(&bytes)?;
        Solver::restore(model, snapshot)
    }
}

//! The model contract: the only surface the planner core depends on.
//!
//! A model supplies sampling, transition/observation/reward generation, a
//! value heuristic, particle synthesis for depleted beliefs, and change
//! descriptors. The core holds states, actions, and observations as opaque
//! values and never inspects their internals.

use std::fmt::Debug;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::solver::change::{DefaultCorrector, HistoryCorrector};
use crate::state_pool::{StateIndex, StatePool, VectorIndex};
use crate::types::{Action, Observation, State, StepResult};
use crate::PlannerRng;

/// Step result specialized to a model's associated types.
pub type StepResultOf<M> = StepResult<
    <M as Model>::State,
    <M as Model>::Action,
    <M as Model>::Observation,
    <M as Model>::TransitionParams,
>;

/// A legality flip declared by the model during a change epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct LegalityChange<K> {
    pub key: K,
    pub action: usize,
    pub legal: bool,
}

/// A POMDP model.
pub trait Model: Sized + Send {
    type State: State;
    type Action: Action;
    type Observation: Observation;
    /// Opaque transition parameters carried on history entries for repair.
    type TransitionParams: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Equivalence key for the legal-actions pool; `()` when unused.
    type LegalityKey: Clone + Debug + Ord + Serialize + DeserializeOwned + Send + Sync + 'static;

    /* ---------- POMDP and search parameters ---------- */

    /// The POMDP discount factor.
    fn discount_factor(&self) -> f64;
    /// Lower bound on the Q-value, used as the default.
    fn min_val(&self) -> f64;
    /// Upper bound on the Q-value.
    fn max_val(&self) -> f64;
    fn ucb_explore_coefficient(&self) -> f64;
    fn heuristic_explore_coefficient(&self) -> f64;
    fn max_trials(&self) -> u64;
    fn max_depth(&self) -> u64;
    /// Particle budget for belief synthesis.
    fn n_particles(&self) -> usize;
    /// Cap on nodes scanned per nearest-neighbour belief lookup.
    fn max_nn_comparisons(&self) -> u64;
    /// Beyond this belief distance a neighbour is not usable.
    fn max_nn_distance(&self) -> f64;
    /// Matching threshold for continuous observations.
    fn max_observation_distance(&self) -> f64 {
        0.0
    }

    /// The full action set in canonical order; `actions[i].index() == i`.
    fn all_actions(&self) -> Vec<Self::Action>;

    /* ---------- Sampling and stepping ---------- */

    fn sample_init_state(&self, rng: &mut PlannerRng) -> Self::State;

    /// Generate the next state, observation, and reward.
    fn generate_step(
        &self,
        state: &Self::State,
        action: &Self::Action,
        rng: &mut PlannerRng,
    ) -> StepResultOf<Self>;

    /// Approximate Q-value of a state, used by the heuristic rollout.
    fn heuristic_value(&self, state: &Self::State) -> f64;

    /// Generate particles consistent with (action, observation) from the
    /// previous belief's particles.
    fn generate_particles_from_belief(
        &self,
        previous: &[Self::State],
        action: &Self::Action,
        obs: &Self::Observation,
        rng: &mut PlannerRng,
    ) -> Vec<Self::State>;

    /// Generate particles consistent with (action, observation) from a
    /// poorly-informed prior. Used only when the previous belief turns out
    /// to be incompatible with the observation received.
    fn generate_particles(
        &self,
        action: &Self::Action,
        obs: &Self::Observation,
        rng: &mut PlannerRng,
    ) -> Vec<Self::State>;

    /* ---------- Legality ---------- */

    fn root_legality_key(&self) -> Option<Self::LegalityKey> {
        None
    }

    /// Key of the belief node reached from a parent with `parent_key` by
    /// taking (action, observation).
    fn child_legality_key(
        &self,
        _parent_key: Option<&Self::LegalityKey>,
        _action: &Self::Action,
        _obs: &Self::Observation,
    ) -> Option<Self::LegalityKey> {
        None
    }

    /// Initial legality of each action for a node created under `key`.
    fn action_legality(&self, _key: Option<&Self::LegalityKey>) -> Vec<bool> {
        vec![true; self.all_actions().len()]
    }

    /* ---------- Model change ---------- */

    /// Parse a change file and return the times at which changes apply.
    fn load_changes(&mut self, _path: &Path) -> Result<Vec<u64>> {
        Ok(Vec::new())
    }

    /// Mutate the model for the change scheduled at `time`, flagging every
    /// affected state through the pool. Returns the legality flips the
    /// change engine should apply to affected belief nodes.
    fn apply_change(
        &mut self,
        _time: u64,
        _pool: &mut StatePool<Self::State>,
    ) -> Result<Vec<LegalityChange<Self::LegalityKey>>> {
        Ok(Vec::new())
    }

    /* ---------- Factories ---------- */

    fn create_state_index(&self) -> Box<dyn StateIndex> {
        Box::new(VectorIndex::new())
    }

    fn create_history_corrector(&self) -> Box<dyn HistoryCorrector<Self>> {
        Box::new(DefaultCorrector)
    }
}

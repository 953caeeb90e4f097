//! Dual-mode rollouts with an adaptive mixture.
//!
//! When the UCB descent reaches a node with an untried action, the tail of
//! the trial is estimated by one of two rollout modes: a one-step heuristic
//! lookup, or a policy transplant that replays the greedy policy of the
//! nearest-neighbour belief node. The mixture between them is learned online
//! from the root-value improvement each mode produces per unit of work.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::model::{Model, StepResultOf};
use crate::solver::Solver;
use crate::types::{NodeId, State};

/// The two rollout strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutMode {
    /// One model step, then the model's heuristic value.
    RandHeuristic = 0,
    /// Greedy descent through the nearest-neighbour node's subtree.
    PolicyTransplant = 1,
}

impl RolloutMode {
    fn idx(self) -> usize {
        self as usize
    }
}

/// Adaptive mixture state for the two rollout modes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RolloutCoordinator {
    explore_coefficient: f64,
    weights: [f64; 2],
    probabilities: [f64; 2],
    use_counts: [u64; 2],
    /// Work each mode has consumed, measured in model steps. A step count
    /// keeps the mixture deterministic under a fixed seed, which wall-clock
    /// timing would not.
    cost_used: [f64; 2],
    last_mode: RolloutMode,
}

impl RolloutCoordinator {
    pub fn new(explore_coefficient: f64) -> Self {
        RolloutCoordinator {
            explore_coefficient,
            weights: [1.0, 1.0],
            probabilities: [0.5, 0.5],
            use_counts: [1, 1],
            cost_used: [1.0, 1.0],
            last_mode: RolloutMode::RandHeuristic,
        }
    }

    /// Draw the mode for the next rollout.
    pub fn choose_mode<R: Rng>(&self, rng: &mut R) -> RolloutMode {
        let p = self.probabilities[RolloutMode::RandHeuristic.idx()].clamp(0.0, 1.0);
        if rng.gen_bool(p) {
            RolloutMode::RandHeuristic
        } else {
            RolloutMode::PolicyTransplant
        }
    }

    /// Record which mode actually ran (after any fallback) and its cost.
    pub fn record(&mut self, mode: RolloutMode, cost: f64) {
        self.cost_used[mode.idx()] += cost;
        self.use_counts[mode.idx()] += 1;
        self.last_mode = mode;
    }

    /// Exponential-weights update after a trial whose root mean Q rose by
    /// `improvement` (negative improvements count as zero).
    pub fn update_probabilities(&mut self, improvement: f64, max_val: f64) {
        let improvement = if improvement.is_finite() {
            improvement.max(0.0)
        } else {
            0.0
        };
        let m = self.last_mode.idx();
        self.weights[m] *= (self.explore_coefficient * (improvement / max_val)
            / (2.0 * self.probabilities[m]))
            .exp();

        let total_weight: f64 = self.weights.iter().sum();
        let mut raw = [0.0; 2];
        for i in 0..2 {
            raw[i] = ((1.0 - self.explore_coefficient) * self.weights[i] / total_weight
                + self.explore_coefficient / 2.0)
                * self.use_counts[i] as f64
                / self.cost_used[i];
        }
        let total: f64 = raw.iter().sum();
        for i in 0..2 {
            self.probabilities[i] = raw[i] / total;
        }
    }

    pub fn probabilities(&self) -> [f64; 2] {
        self.probabilities
    }

    pub fn last_mode(&self) -> RolloutMode {
        self.last_mode
    }
}

/// Outcome of one rollout invocation.
pub(crate) struct RolloutOutcome<M: Model> {
    pub step: StepResultOf<M>,
    /// Discounted Q estimate aligned to the rollout point.
    pub q_estimate: f64,
}

impl<M: Model> Solver<M> {
    /// Expand the next untried action at `node` and estimate its tail value
    /// with the chosen rollout mode. Unreachable policy transplants fall
    /// back to the heuristic mode silently and count toward it.
    pub(crate) fn rollout(
        &mut self,
        node: NodeId,
        state: &M::State,
        start_discount: f64,
    ) -> Result<RolloutOutcome<M>> {
        let action_index = self
            .tree
            .node_mut(node)
            .action_map
            .next_action_to_try()
            .ok_or_else(|| PlannerError::invariant("rollout invoked with no action left to try"))?;
        let action = self.actions[action_index].clone();
        let step = self.model.generate_step(state, &action, &mut self.rng);
        let discount_factor = self.model.discount_factor();

        let mut cost = 1.0;
        let mut q_estimate = 0.0;
        let mut mode = self.rollout.choose_mode(&mut self.rng);

        if mode == RolloutMode::PolicyTransplant {
            match self.nearest_neighbor(node) {
                None => mode = RolloutMode::RandHeuristic,
                Some(neighbor) => {
                    let start = self.tree.get_child(neighbor, action_index, &step.observation);
                    let (tail, steps) =
                        self.rollout_policy_tail(start, step.next_state.clone(), discount_factor);
                    q_estimate = tail * start_discount * discount_factor;
                    cost += steps as f64;
                }
            }
        }
        if mode == RolloutMode::RandHeuristic {
            if !step.is_terminal {
                q_estimate =
                    self.model.heuristic_value(&step.next_state) * start_discount * discount_factor;
            }
        }
        self.rollout.record(mode, cost);

        Ok(RolloutOutcome { step, q_estimate })
    }

    /// Greedy descent through a transplanted subtree, accumulating
    /// discounted reward until the policy runs out of information.
    fn rollout_policy_tail(
        &mut self,
        node: Option<NodeId>,
        state: M::State,
        discount_factor: f64,
    ) -> (f64, u64) {
        let Some(node) = node else {
            return (0.0, 0);
        };
        if self.tree.node(node).particle_count() == 0 {
            return (0.0, 0);
        }
        let Some(action_index) = self.tree.node(node).action_map.recommended_action() else {
            return (0.0, 0);
        };
        let action = self.actions[action_index].clone();
        let step = self.model.generate_step(&state, &action, &mut self.rng);
        let child = self.tree.get_child(node, action_index, &step.observation);
        let mut q = step.reward;
        let mut steps = 1;
        if !step.is_terminal {
            let (tail, tail_steps) =
                self.rollout_policy_tail(child, step.next_state, discount_factor);
            q += discount_factor * tail;
            steps += tail_steps;
        }
        (q, steps)
    }

    /// Nearest-neighbour belief lookup: scan nodes in insertion order up to
    /// the comparison cap, skipping nodes with no fresh particles since the
    /// last scan from this node.
    pub(crate) fn nearest_neighbor(&mut self, node: NodeId) -> Option<NodeId> {
        let max_comparisons = self.model.max_nn_comparisons();
        let max_distance = self.model.max_nn_distance();
        let t_nn_comp = self.tree.node(node).t_nn_comp;

        let mut nearest = self.tree.node(node).nn_cache;
        let mut min_distance = f64::INFINITY;
        let mut tried = 0;
        for other in self.tree.all_nodes() {
            if tried >= max_comparisons {
                break;
            }
            if other != node && t_nn_comp < self.tree.node(other).t_last_added_particle {
                let d = self.belief_distance(node, other);
                if d < min_distance {
                    min_distance = d;
                    nearest = Some(other);
                }
            }
            tried += 1;
        }
        self.tree.stamp_nn_comparison(node, nearest);
        if min_distance > max_distance {
            None
        } else {
            nearest
        }
    }

    /// Distance between two beliefs: the mean pairwise component-independent
    /// L1 distance over their particle sets.
    pub(crate) fn belief_distance(&self, a: NodeId, b: NodeId) -> f64 {
        let pa = self.tree.node(a).particles();
        let pb = self.tree.node(b).particles();
        if pa.is_empty() || pb.is_empty() {
            return f64::INFINITY;
        }
        let mut total = 0.0;
        for ra in pa {
            let sa = self.pool.state(self.histories.entry(*ra).state);
            for rb in pb {
                let sb = self.pool.state(self.histories.entry(*rb).state);
                total += sa.distance_to(sb);
            }
        }
        total / (pa.len() * pb.len()) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_seed_values() {
        let coordinator = RolloutCoordinator::new(0.5);
        assert_eq!(coordinator.probabilities(), [0.5, 0.5]);
    }

    #[test]
    fn test_update_keeps_distribution() {
        let mut coordinator = RolloutCoordinator::new(0.5);
        coordinator.record(RolloutMode::PolicyTransplant, 3.0);
        coordinator.update_probabilities(4.0, 10.0);

        let p = coordinator.probabilities();
        assert!((p[0] + p[1] - 1.0).abs() < 1e-12);
        assert!(p[0] > 0.0 && p[1] > 0.0);
    }

    #[test]
    fn test_negative_improvement_clamped() {
        let mut coordinator = RolloutCoordinator::new(0.5);
        let before = coordinator.probabilities();
        coordinator.record(RolloutMode::RandHeuristic, 1.0);
        coordinator.update_probabilities(-5.0, 10.0);
        let after = coordinator.probabilities();
        // Weight unchanged; only the usage/cost ratio moves the mixture
        assert!((before[0] + before[1] - 1.0).abs() < 1e-12);
        assert!((after[0] + after[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_successful_mode_gains_probability() {
        let mut coordinator = RolloutCoordinator::new(0.5);
        for _ in 0..10 {
            coordinator.record(RolloutMode::PolicyTransplant, 1.0);
            coordinator.update_probabilities(8.0, 10.0);
        }
        let p = coordinator.probabilities();
        assert!(p[RolloutMode::PolicyTransplant.idx()] > 0.5);
    }

    #[test]
    fn test_choose_mode_follows_distribution() {
        let mut coordinator = RolloutCoordinator::new(0.5);
        // Push the mixture hard toward the transplant mode
        for _ in 0..50 {
            coordinator.record(RolloutMode::PolicyTransplant, 1.0);
            coordinator.update_probabilities(10.0, 10.0);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let draws = (0..200)
            .filter(|_| coordinator.choose_mode(&mut rng) == RolloutMode::PolicyTransplant)
            .count();
        assert!(draws > 100);
    }
}

//! UCB-guided tree descent, backup, and undo-backup.
//!
//! One trial (`single_search`) allocates a fresh history sequence, descends
//! the belief tree choosing UCB actions while every action at the current
//! node has been tried, hands over to the rollout once an untried action is
//! found, and finally backs the trajectory's discounted return up into the
//! Q-statistics of every node it visited. Backup is reversible: a sequence's
//! contribution can be subtracted again exactly, which is what makes
//! incremental repair possible.

use crate::error::{PlannerError, Result};
use crate::history::EntryRef;
use crate::model::Model;
use crate::solver::Solver;
use crate::types::{Action, NodeId, SeqId, StateId};

impl<M: Model> Solver<M> {
    /// Run up to `max_trials` search trials from `node`.
    ///
    /// At the root with no particles yet, trials start from freshly sampled
    /// initial states; elsewhere they start from particles sampled uniformly
    /// from the node's belief.
    pub fn improve(&mut self, node: NodeId, max_trials: u64, max_depth: u64) -> Result<()> {
        if max_trials == 0 {
            return Ok(());
        }
        if self.tree.node(node).particle_count() == 0 {
            if node != self.tree.root() {
                return Err(PlannerError::invariant(
                    "improvement requested at a belief node with no particles",
                ));
            }
            for _ in 0..max_trials {
                let state = self.model.sample_init_state(&mut self.rng);
                let info = self.pool.create_or_get_info(state);
                self.single_search(node, info, 0, max_depth)?;
            }
            return Ok(());
        }

        let first = self.tree.node(node).particles()[0];
        let depth = self.histories[first.seq].start_depth + first.index as u64;

        // Draw all the start particles before searching; trials add new
        // particles to the node as they run.
        let mut samples: Vec<StateId> = Vec::with_capacity(max_trials as usize);
        for _ in 0..max_trials {
            let r = self
                .tree
                .node(node)
                .sample_particle(&mut self.rng)
                .ok_or_else(|| PlannerError::invariant("belief node lost its particles"))?;
            samples.push(self.histories.entry(r).state);
        }
        for state in samples {
            self.single_search(node, state, depth, max_depth)?;
        }
        Ok(())
    }

    /// One search trial: a fresh sequence rooted at `node` starting from the
    /// given canonical state.
    pub fn single_search(
        &mut self,
        node: NodeId,
        state: StateId,
        start_depth: u64,
        max_depth: u64,
    ) -> Result<()> {
        let discount = self.model.discount_factor().powi(start_depth as i32);
        let seq = self.histories.add_new(start_depth);
        let index = self.histories[seq].add_entry(state, discount, node);
        self.register_entry(EntryRef { seq, index }, node);
        self.continue_search(seq, max_depth)
    }

    /// Extend a sequence from its frontier entry until the depth bound, a
    /// terminal step, or a rollout, then back it up.
    pub fn continue_search(&mut self, seq: SeqId, max_depth: u64) -> Result<()> {
        let discount_factor = self.model.discount_factor();
        let ucb_coefficient = self.model.ucb_explore_coefficient();

        let mut entry_index = self.histories[seq].len() - 1;
        let mut current_discount = self.histories[seq].entries[entry_index].discount;
        let mut node = self.histories[seq].entries[entry_index].node;

        let root_node = self.histories[seq].entries[0].node;
        let initial_root_q = self
            .tree
            .node(root_node)
            .action_map
            .best_mean_q(self.model.min_val());

        let mut rollout_used = false;
        let mut done = false;
        let mut current_depth = self.histories[seq].start_depth + entry_index as u64 + 1;

        while !done && current_depth <= max_depth {
            current_depth += 1;
            let state = self
                .pool
                .state(self.histories[seq].entries[entry_index].state)
                .clone();

            let (step, rollout_estimate) = if self.tree.node(node).action_map.has_action_to_try() {
                let outcome = self.rollout(node, &state, current_discount)?;
                rollout_used = true;
                done = true;
                (outcome.step, Some(outcome.q_estimate))
            } else {
                let action_index = self
                    .tree
                    .node(node)
                    .action_map
                    .ucb_action(ucb_coefficient)
                    .ok_or_else(|| {
                        PlannerError::invariant("no legal action available during descent")
                    })?;
                let action = self.actions[action_index].clone();
                let step = self.model.generate_step(&state, &action, &mut self.rng);
                done = step.is_terminal;
                (step, None)
            };

            {
                let sequence = &mut self.histories[seq];
                sequence.is_terminal = step.is_terminal;
                let entry = &mut sequence.entries[entry_index];
                entry.reward = step.reward;
                entry.action = Some(step.action.clone());
                entry.transition = step.transition.clone();
                entry.observation = Some(step.observation.clone());
            }

            let next_state = self.pool.create_or_get_info(step.next_state);
            current_discount *= discount_factor;
            let new_index = self.histories[seq].add_entry(next_state, current_discount, node);
            let child = self.create_or_get_child(node, step.action.index(), &step.observation);
            let new_ref = EntryRef {
                seq,
                index: new_index,
            };
            self.register_entry(new_ref, child);

            if let Some(estimate) = rollout_estimate {
                self.histories.entry_mut(new_ref).total_discounted_reward = estimate;
            }

            node = child;
            entry_index = new_index;
        }

        self.backup(seq)?;
        if rollout_used {
            let new_root_q = self
                .tree
                .node(root_node)
                .action_map
                .best_mean_q(self.model.min_val());
            self.rollout
                .update_probabilities(new_root_q - initial_root_q, self.model.max_val());
        }
        Ok(())
    }

    /// Propagate a sequence's discounted return leaf-to-root into the
    /// Q-statistics of the nodes it visited.
    ///
    /// An entry backed up before contributes only the delta against its
    /// previous total, with no visit increment.
    pub fn backup(&mut self, seq: SeqId) -> Result<()> {
        let len = self.histories[seq].len();
        let mut running = {
            let entry = &mut self.histories[seq].entries[len - 1];
            if entry.action.is_some() {
                entry.total_discounted_reward = entry.discount * entry.reward;
            }
            entry.total_discounted_reward
        };

        for index in (0..len.saturating_sub(1)).rev() {
            let (node, action_index, previous, new_total, was_backed_up) = {
                let entry = &mut self.histories[seq].entries[index];
                let action_index = entry
                    .action
                    .as_ref()
                    .map(|a| a.index())
                    .ok_or_else(|| {
                        PlannerError::invariant("interior history entry carries no action")
                    })?;
                let previous = entry.total_discounted_reward;
                let new_total = entry.discount * entry.reward + running;
                entry.total_discounted_reward = new_total;
                let was_backed_up = entry.has_been_backed_up;
                entry.has_been_backed_up = true;
                running = new_total;
                (entry.node, action_index, previous, new_total, was_backed_up)
            };
            let map = &mut self.tree.node_mut(node).action_map;
            if was_backed_up {
                map.update_q(action_index, new_total - previous, 0);
            } else {
                map.update_q(action_index, new_total, 1);
            }
        }
        Ok(())
    }

    /// Subtract a sequence's contribution from the tree statistics exactly,
    /// clearing every backed-up flag the backup set.
    pub fn undo_backup(&mut self, seq: SeqId) -> Result<()> {
        let len = self.histories[seq].len();
        for index in (0..len.saturating_sub(1)).rev() {
            let (node, action_index, total) = {
                let entry = &mut self.histories[seq].entries[index];
                if !entry.has_been_backed_up {
                    return Err(PlannerError::invariant(
                        "undo requested for an entry that was never backed up",
                    ));
                }
                entry.has_been_backed_up = false;
                let action_index = entry
                    .action
                    .as_ref()
                    .map(|a| a.index())
                    .ok_or_else(|| {
                        PlannerError::invariant("interior history entry carries no action")
                    })?;
                (entry.node, action_index, entry.total_discounted_reward)
            };
            self.tree
                .node_mut(node)
                .action_map
                .update_q(action_index, -total, -1);
        }
        Ok(())
    }

    /// Synthesize particles for a depleted child belief during execution.
    ///
    /// Tries the belief-informed generator first and falls back to the
    /// uninformed one. Each synthesized particle becomes its own one-entry
    /// sequence, backed up immediately.
    pub fn add_child(
        &mut self,
        node: NodeId,
        action: &M::Action,
        obs: &M::Observation,
        time_step: u64,
    ) -> Result<NodeId> {
        eprintln!("WARNING: Adding particles due to depletion");
        let next = self.create_or_get_child(node, action.index(), obs);

        let previous: Vec<M::State> = self
            .tree
            .node(node)
            .particles()
            .iter()
            .map(|r| self.pool.state(self.histories.entry(*r).state).clone())
            .collect();

        let mut particles =
            self.model
                .generate_particles_from_belief(&previous, action, obs, &mut self.rng);
        if particles.is_empty() {
            eprintln!("WARNING: Could not generate based on belief!");
            particles = self.model.generate_particles(action, obs, &mut self.rng);
        }
        if particles.is_empty() {
            return Err(PlannerError::ParticleDepletion { node: next });
        }

        let discount_factor = self.model.discount_factor();
        let current_discount = discount_factor.powi(time_step as i32);
        for state in particles {
            let info = self.pool.create_or_get_info(state);
            let seq = self.histories.add_new(time_step);
            let index =
                self.histories[seq].add_entry(info, current_discount * discount_factor, next);
            self.register_entry(EntryRef { seq, index }, next);
            self.backup(seq)?;
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::error::PlannerError;
    use crate::types::{Observation, State, StepResult};
    use crate::PlannerRng;
    use ndarray::array;
    use serde::{Deserialize, Serialize};

    /// A deterministic corridor: walk right to the end for a reward of 1.
    struct ChainModel {
        config: SolverConfig,
        length: i64,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
    struct Cell(i64);

    impl State for Cell {
        fn as_vector(&self) -> ndarray::Array1<f64> {
            array![self.0 as f64]
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
    enum Step {
        Left,
        Right,
    }

    impl crate::types::Action for Step {
        fn index(&self) -> usize {
            *self as usize
        }
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Seen(i64);

    impl Observation for Seen {}

    impl crate::model::Model for ChainModel {
        type State = Cell;
        type Action = Step;
        type Observation = Seen;
        type TransitionParams = ();
        type LegalityKey = ();

        fn discount_factor(&self) -> f64 {
            self.config.discount
        }
        fn min_val(&self) -> f64 {
            0.0
        }
        fn max_val(&self) -> f64 {
            1.0
        }
        fn ucb_explore_coefficient(&self) -> f64 {
            self.config.ucb_explore_coefficient
        }
        fn heuristic_explore_coefficient(&self) -> f64 {
            self.config.heuristic_explore_coefficient
        }
        fn max_trials(&self) -> u64 {
            self.config.max_trials
        }
        fn max_depth(&self) -> u64 {
            self.config.max_depth
        }
        fn n_particles(&self) -> usize {
            self.config.n_particles
        }
        fn max_nn_comparisons(&self) -> u64 {
            self.config.max_nn_comparisons
        }
        fn max_nn_distance(&self) -> f64 {
            self.config.max_nn_distance
        }

        fn all_actions(&self) -> Vec<Step> {
            vec![Step::Left, Step::Right]
        }

        fn sample_init_state(&self, _rng: &mut PlannerRng) -> Cell {
            Cell(0)
        }

        fn generate_step(
            &self,
            state: &Cell,
            action: &Step,
            _rng: &mut PlannerRng,
        ) -> StepResult<Cell, Step, Seen, ()> {
            let next = match action {
                Step::Left => Cell((state.0 - 1).max(0)),
                Step::Right => Cell(state.0 + 1),
            };
            let is_terminal = next.0 >= self.length - 1;
            StepResult {
                action: *action,
                transition: None,
                observation: Seen(next.0),
                reward: if is_terminal { 1.0 } else { 0.0 },
                next_state: next,
                is_terminal,
            }
        }

        fn heuristic_value(&self, _state: &Cell) -> f64 {
            0.0
        }

        fn generate_particles_from_belief(
            &self,
            previous: &[Cell],
            action: &Step,
            obs: &Seen,
            rng: &mut PlannerRng,
        ) -> Vec<Cell> {
            previous
                .iter()
                .filter_map(|cell| {
                    let step = self.generate_step(cell, action, rng);
                    (step.observation == *obs).then_some(step.next_state)
                })
                .collect()
        }

        fn generate_particles(&self, _action: &Step, obs: &Seen, _rng: &mut PlannerRng) -> Vec<Cell> {
            vec![Cell(obs.0)]
        }
    }

    fn chain_solver() -> Solver<ChainModel> {
        let mut config = SolverConfig::default();
        config.discount = 0.5;
        config.max_depth = 6;
        config.max_nn_comparisons = 3;
        let model = ChainModel { config, length: 4 };
        Solver::new(model, 1).unwrap()
    }

    #[test]
    fn test_backup_computes_suffix_sums() {
        let mut solver = chain_solver();
        let root = solver.root();
        solver.improve(root, 8, 6).unwrap();

        for sequence in solver.histories.iter() {
            let entries = &sequence.entries;
            for i in 0..entries.len() - 1 {
                let expected =
                    entries[i].discount * entries[i].reward + entries[i + 1].total_discounted_reward;
                assert!((entries[i].total_discounted_reward - expected).abs() < 1e-12);
                assert!(entries[i].has_been_backed_up);
            }
        }
        solver.check_consistency().unwrap();
    }

    #[test]
    fn test_visit_counts_match_sequences_through_node() {
        let mut solver = chain_solver();
        let root = solver.root();
        solver.improve(root, 10, 6).unwrap();

        // Each trial contributes exactly one visit at the root
        let total: i64 = (0..2)
            .map(|a| solver.tree.node(root).action_map.entry(a).visits)
            .sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_undo_backup_restores_and_rejects_double_undo() {
        let mut solver = chain_solver();
        let root = solver.root();
        solver.improve(root, 6, 6).unwrap();

        let id = solver.histories.iter().next().unwrap().id();
        solver.undo_backup(id).unwrap();
        let result = solver.undo_backup(id);
        assert!(matches!(
            result,
            Err(PlannerError::InvariantViolation(_))
        ));

        // Re-backup; every trial's visit is accounted for again
        solver.backup(id).unwrap();
        let total: i64 = (0..2)
            .map(|a| solver.tree.node(root).action_map.entry(a).visits)
            .sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_improve_rejects_empty_interior_node() {
        let mut solver = chain_solver();
        let root = solver.root();
        solver.improve(root, 4, 6).unwrap();
        let empty = solver.create_or_get_child(root, Step::Left.index(), &Seen(99));
        assert_eq!(solver.tree.node(empty).particle_count(), 0);
        assert!(solver.improve(empty, 4, 6).is_err());
    }

    #[test]
    fn test_add_child_backs_up_single_entries() {
        let mut solver = chain_solver();
        let root = solver.root();
        solver.improve(root, 4, 6).unwrap();

        let child = solver
            .add_child(root, &Step::Right, &Seen(1), 0)
            .unwrap();
        assert!(solver.tree.node(child).particle_count() > 0);
        for r in solver.tree.node(child).particles() {
            let entry = solver.histories.entry(*r);
            assert_eq!(entry.total_discounted_reward, 0.0);
            assert!(!entry.has_been_backed_up);
        }
        solver.check_consistency().unwrap();
    }
}

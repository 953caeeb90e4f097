//! Rock sampling with position-dependent action legality.
//!
//! A rover on a square grid knows its own position exactly but not which
//! rocks are worth sampling. A long-range sensor returns a noisy goodness
//! reading that decays with distance. Movement off the north, south, and
//! west edges is illegal rather than penalized, so belief nodes carry
//! per-position legality through the legal-actions pool; driving off the
//! east edge ends the episode.

use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SolverConfig;
use crate::domains::GridPos;
use crate::error::{PlannerError, Result};
use crate::model::Model;
use crate::types::{Action, Observation, State, StepResult};
use crate::PlannerRng;

#[derive(Clone, Debug)]
pub struct RocksConfig {
    pub solver: SolverConfig,
    pub good_rock_reward: f64,
    pub bad_rock_penalty: f64,
    pub exit_reward: f64,
    /// Distance at which the sensor is halfway between perfect and random.
    pub half_efficiency_distance: f64,
}

impl Default for RocksConfig {
    fn default() -> Self {
        RocksConfig {
            solver: SolverConfig::default(),
            good_rock_reward: 10.0,
            bad_rock_penalty: 10.0,
            exit_reward: 10.0,
            half_efficiency_distance: 20.0,
        }
    }
}

impl RocksConfig {
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = RocksConfig::default();
        for (key, value) in pairs {
            if config.solver.set(key, value)? {
                continue;
            }
            let parsed = value.parse::<f64>().map_err(|_| {
                PlannerError::invalid_config(key.to_string(), format!("cannot parse '{}'", value))
            });
            match key {
                "goodRockReward" => config.good_rock_reward = parsed?,
                "badRockPenalty" => config.bad_rock_penalty = parsed?,
                "exitReward" => config.exit_reward = parsed?,
                "halfEfficiencyDistance" => config.half_efficiency_distance = parsed?,
                _ => {
                    return Err(PlannerError::invalid_config(
                        key.to_string(),
                        "unrecognized option".to_string(),
                    ))
                }
            }
        }
        config.solver.validate()?;
        Ok(config)
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct RocksState {
    pub pos: GridPos,
    /// Goodness of each rock, in rock order.
    pub rocks: Vec<bool>,
}

impl State for RocksState {
    fn as_vector(&self) -> Array1<f64> {
        let mut values = Vec::with_capacity(2 + self.rocks.len());
        values.push(self.pos.i as f64);
        values.push(self.pos.j as f64);
        values.extend(self.rocks.iter().map(|&good| good as i64 as f64));
        Array1::from_vec(values)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RocksAction {
    North,
    East,
    South,
    West,
    Sample,
    Check(usize),
}

impl Action for RocksAction {
    fn index(&self) -> usize {
        match self {
            RocksAction::North => 0,
            RocksAction::East => 1,
            RocksAction::South => 2,
            RocksAction::West => 3,
            RocksAction::Sample => 4,
            RocksAction::Check(rock) => 5 + rock,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RocksObservation {
    None,
    Good,
    Bad,
}

impl Observation for RocksObservation {}

/// The rock-sampling model on an n-by-n grid.
pub struct RocksModel {
    config: RocksConfig,
    size: i64,
    start: GridPos,
    rock_positions: Vec<GridPos>,
}

impl RocksModel {
    pub fn new(
        config: RocksConfig,
        size: i64,
        start: GridPos,
        rock_positions: Vec<GridPos>,
    ) -> Self {
        RocksModel {
            config,
            size,
            start,
            rock_positions,
        }
    }

    /// The classic 7x7 instance with 8 rocks.
    pub fn standard_7_8(config: RocksConfig) -> Self {
        let rocks = vec![
            GridPos::new(0, 1),
            GridPos::new(1, 5),
            GridPos::new(2, 2),
            GridPos::new(3, 6),
            GridPos::new(4, 0),
            GridPos::new(5, 3),
            GridPos::new(6, 2),
            GridPos::new(6, 5),
        ];
        RocksModel::new(config, 7, GridPos::new(3, 0), rocks)
    }

    pub fn rock_count(&self) -> usize {
        self.rock_positions.len()
    }

    fn rock_at(&self, pos: GridPos) -> Option<usize> {
        self.rock_positions.iter().position(|&r| r == pos)
    }

    fn moved(pos: GridPos, action: RocksAction) -> GridPos {
        match action {
            RocksAction::North => GridPos::new(pos.i - 1, pos.j),
            RocksAction::East => GridPos::new(pos.i, pos.j + 1),
            RocksAction::South => GridPos::new(pos.i + 1, pos.j),
            RocksAction::West => GridPos::new(pos.i, pos.j - 1),
            _ => pos,
        }
    }

    /// Probability the sensor reads the rock correctly from `pos`.
    fn sensor_accuracy(&self, pos: GridPos, rock: usize) -> f64 {
        let distance = pos.manhattan_distance(&self.rock_positions[rock]) as f64;
        let efficiency = (2.0_f64).powf(-distance / self.config.half_efficiency_distance);
        0.5 * (1.0 + efficiency)
    }

    /// Legality of every action at a position: moving off the north, south,
    /// or west edge is illegal, sampling requires standing on a rock.
    fn legality_at(&self, pos: GridPos) -> Vec<bool> {
        let mut legal = vec![true; 5 + self.rock_positions.len()];
        legal[RocksAction::North.index()] = pos.i > 0;
        legal[RocksAction::South.index()] = pos.i < self.size - 1;
        legal[RocksAction::West.index()] = pos.j > 0;
        legal[RocksAction::Sample.index()] = self.rock_at(pos).is_some();
        legal
    }
}

impl Model for RocksModel {
    type State = RocksState;
    type Action = RocksAction;
    type Observation = RocksObservation;
    type TransitionParams = ();
    type LegalityKey = GridPos;

    fn discount_factor(&self) -> f64 {
        self.config.solver.discount
    }

    fn min_val(&self) -> f64 {
        -self.config.bad_rock_penalty / (1.0 - self.config.solver.discount)
    }

    fn max_val(&self) -> f64 {
        self.config.good_rock_reward * self.rock_positions.len() as f64 + self.config.exit_reward
    }

    fn ucb_explore_coefficient(&self) -> f64 {
        self.config.solver.ucb_explore_coefficient
    }

    fn heuristic_explore_coefficient(&self) -> f64 {
        self.config.solver.heuristic_explore_coefficient
    }

    fn max_trials(&self) -> u64 {
        self.config.solver.max_trials
    }

    fn max_depth(&self) -> u64 {
        self.config.solver.max_depth
    }

    fn n_particles(&self) -> usize {
        self.config.solver.n_particles
    }

    fn max_nn_comparisons(&self) -> u64 {
        self.config.solver.max_nn_comparisons
    }

    fn max_nn_distance(&self) -> f64 {
        self.config.solver.max_nn_distance
    }

    fn all_actions(&self) -> Vec<RocksAction> {
        let mut actions = vec![
            RocksAction::North,
            RocksAction::East,
            RocksAction::South,
            RocksAction::West,
            RocksAction::Sample,
        ];
        actions.extend((0..self.rock_positions.len()).map(RocksAction::Check));
        actions
    }

    fn sample_init_state(&self, rng: &mut PlannerRng) -> RocksState {
        RocksState {
            pos: self.start,
            rocks: (0..self.rock_positions.len()).map(|_| rng.gen()).collect(),
        }
    }

    fn generate_step(
        &self,
        state: &RocksState,
        action: &RocksAction,
        rng: &mut PlannerRng,
    ) -> StepResult<RocksState, RocksAction, RocksObservation, ()> {
        let mut next_state = state.clone();
        let mut reward = 0.0;
        let mut observation = RocksObservation::None;
        let mut is_terminal = false;

        match action {
            RocksAction::North | RocksAction::South | RocksAction::West | RocksAction::East => {
                let target = Self::moved(state.pos, *action);
                if *action == RocksAction::East && target.j >= self.size {
                    // Driving off the east edge reaches the exit area
                    reward = self.config.exit_reward;
                    is_terminal = true;
                    next_state.pos = target;
                } else if target.i < 0
                    || target.i >= self.size
                    || target.j < 0
                    || target.j >= self.size
                {
                    // Unreachable through legal search; transplanted
                    // rollouts can still ask for it
                    next_state.pos = state.pos;
                } else {
                    next_state.pos = target;
                }
            }
            RocksAction::Sample => match self.rock_at(state.pos) {
                Some(rock) if state.rocks[rock] => {
                    reward = self.config.good_rock_reward;
                    next_state.rocks[rock] = false;
                }
                _ => {
                    reward = -self.config.bad_rock_penalty;
                }
            },
            RocksAction::Check(rock) => {
                let accuracy = self.sensor_accuracy(state.pos, *rock);
                let correct = rng.gen_bool(accuracy);
                let good = state.rocks[*rock] == correct;
                observation = if good {
                    RocksObservation::Good
                } else {
                    RocksObservation::Bad
                };
            }
        }

        StepResult {
            action: *action,
            transition: None,
            observation,
            reward,
            next_state,
            is_terminal,
        }
    }

    fn heuristic_value(&self, state: &RocksState) -> f64 {
        let discount = self.config.solver.discount;
        let mut value = 0.0;
        for (rock, &good) in state.rocks.iter().enumerate() {
            if good {
                let distance = state.pos.manhattan_distance(&self.rock_positions[rock]);
                value += self.config.good_rock_reward * discount.powi(distance as i32);
            }
        }
        let exit_distance = self.size - state.pos.j;
        value + self.config.exit_reward * discount.powi(exit_distance as i32)
    }

    fn generate_particles_from_belief(
        &self,
        previous: &[RocksState],
        action: &RocksAction,
        obs: &RocksObservation,
        rng: &mut PlannerRng,
    ) -> Vec<RocksState> {
        let mut particles = Vec::new();
        if previous.is_empty() {
            return particles;
        }
        let attempts = self.config.solver.n_particles * 2;
        for _ in 0..attempts {
            if particles.len() >= self.config.solver.n_particles {
                break;
            }
            let prior = &previous[rng.gen_range(0..previous.len())];
            let step = self.generate_step(prior, action, rng);
            if step.observation == *obs {
                particles.push(step.next_state);
            }
        }
        particles
    }

    fn generate_particles(
        &self,
        _action: &RocksAction,
        _obs: &RocksObservation,
        _rng: &mut PlannerRng,
    ) -> Vec<RocksState> {
        // The rover position cannot be recovered from a lone observation,
        // so there is no poorly-informed prior worth synthesizing from.
        Vec::new()
    }

    fn root_legality_key(&self) -> Option<GridPos> {
        Some(self.start)
    }

    fn child_legality_key(
        &self,
        parent_key: Option<&GridPos>,
        action: &RocksAction,
        _obs: &RocksObservation,
    ) -> Option<GridPos> {
        let pos = *parent_key?;
        Some(Self::moved(pos, *action))
    }

    fn action_legality(&self, key: Option<&GridPos>) -> Vec<bool> {
        match key {
            Some(&pos) => self.legality_at(pos),
            None => vec![true; 5 + self.rock_positions.len()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn model() -> RocksModel {
        RocksModel::standard_7_8(RocksConfig::default())
    }

    fn all_good_state(model: &RocksModel) -> RocksState {
        RocksState {
            pos: model.start,
            rocks: vec![true; model.rock_count()],
        }
    }

    #[test]
    fn test_action_indices_are_canonical() {
        let model = model();
        for (i, action) in model.all_actions().iter().enumerate() {
            assert_eq!(action.index(), i);
        }
        assert_eq!(model.all_actions().len(), 13);
    }

    #[test]
    fn test_edge_legality() {
        let model = model();
        let legal = model.legality_at(GridPos::new(0, 0));
        assert!(!legal[RocksAction::North.index()]);
        assert!(!legal[RocksAction::West.index()]);
        assert!(legal[RocksAction::South.index()]);
        assert!(legal[RocksAction::East.index()]);

        // Sampling is legal only on a rock
        assert!(!legal[RocksAction::Sample.index()]);
        let on_rock = model.legality_at(GridPos::new(2, 2));
        assert!(on_rock[RocksAction::Sample.index()]);
    }

    #[test]
    fn test_east_exit_is_terminal() {
        let model = model();
        let mut rng = PlannerRng::seed_from_u64(0);
        let mut state = all_good_state(&model);
        state.pos = GridPos::new(3, 6);
        let step = model.generate_step(&state, &RocksAction::East, &mut rng);
        assert!(step.is_terminal);
        assert_eq!(step.reward, model.config.exit_reward);
    }

    #[test]
    fn test_sampling_good_rock_spends_it() {
        let model = model();
        let mut rng = PlannerRng::seed_from_u64(0);
        let mut state = all_good_state(&model);
        state.pos = GridPos::new(2, 2);
        let step = model.generate_step(&state, &RocksAction::Sample, &mut rng);
        assert_eq!(step.reward, model.config.good_rock_reward);
        assert!(!step.next_state.rocks[2]);

        // Sampling the same rock again is penalized
        let step2 = model.generate_step(&step.next_state, &RocksAction::Sample, &mut rng);
        assert_eq!(step2.reward, -model.config.bad_rock_penalty);
    }

    #[test]
    fn test_sensor_accuracy_decays_with_distance() {
        let model = model();
        let near = model.sensor_accuracy(GridPos::new(2, 2), 2);
        let far = model.sensor_accuracy(GridPos::new(6, 6), 4);
        assert_eq!(near, 1.0);
        assert!(far < near);
        assert!(far > 0.5);
    }

    #[test]
    fn test_check_observes_without_moving() {
        let model = model();
        let mut rng = PlannerRng::seed_from_u64(1);
        let state = all_good_state(&model);
        let step = model.generate_step(&state, &RocksAction::Check(0), &mut rng);
        assert_eq!(step.next_state, state);
        assert_ne!(step.observation, RocksObservation::None);
        assert!(!step.is_terminal);
    }

    #[test]
    fn test_legality_key_follows_movement() {
        let model = model();
        let root = model.root_legality_key().unwrap();
        let child = model.child_legality_key(
            Some(&root),
            &RocksAction::South,
            &RocksObservation::None,
        );
        assert_eq!(child, Some(GridPos::new(4, 0)));
        let checked = model.child_legality_key(
            Some(&root),
            &RocksAction::Check(3),
            &RocksObservation::Good,
        );
        assert_eq!(checked, Some(root));
    }
}

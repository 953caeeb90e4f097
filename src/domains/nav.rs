//! Grid navigation with mid-episode geometry changes.
//!
//! The robot starts somewhere in a start region and must reach the goal.
//! Its position is sensed only inside observation areas; elsewhere the
//! observation is blank and the belief spreads. Change files add obstacle
//! or observation rectangles at scheduled epochs: states inside a new
//! obstacle are deleted, states inside a new observation area get their
//! incoming observations repaired.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{array, Array1};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::changes::ChangeFlags;
use crate::config::SolverConfig;
use crate::domains::{GridPos, GridRect};
use crate::error::{PlannerError, Result};
use crate::model::{LegalityChange, Model};
use crate::state_pool::StatePool;
use crate::types::{Action, Observation, State, StepResult};
use crate::PlannerRng;

/// Area kinds a change file can add.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AreaType {
    Obstacle,
    Observation,
}

impl AreaType {
    fn parse(text: &str) -> Option<AreaType> {
        match text {
            "Obstacle" => Some(AreaType::Obstacle),
            "Observation" => Some(AreaType::Observation),
            _ => None,
        }
    }
}

/// One parsed change record.
#[derive(Clone, Debug)]
pub struct NavChange {
    pub area_type: AreaType,
    pub id: u64,
    pub rect: GridRect,
}

#[derive(Clone, Debug)]
pub struct NavConfig {
    pub solver: SolverConfig,
    pub move_cost: f64,
    pub collision_penalty: f64,
    pub goal_reward: f64,
}

impl Default for NavConfig {
    fn default() -> Self {
        NavConfig {
            solver: SolverConfig::default(),
            move_cost: 1.0,
            collision_penalty: 10.0,
            goal_reward: 100.0,
        }
    }
}

impl NavConfig {
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = NavConfig::default();
        for (key, value) in pairs {
            if config.solver.set(key, value)? {
                continue;
            }
            let parsed = value.parse::<f64>().map_err(|_| {
                PlannerError::invalid_config(key.to_string(), format!("cannot parse '{}'", value))
            });
            match key {
                "moveCost" => config.move_cost = parsed?,
                "collisionPenalty" => config.collision_penalty = parsed?,
                "goalReward" => config.goal_reward = parsed?,
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
pub struct NavState {
    pub pos: GridPos,
}

impl State for NavState {
    fn as_vector(&self) -> Array1<f64> {
        array![self.pos.i as f64, self.pos.j as f64]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavAction {
    North,
    East,
    South,
    West,
}

impl NavAction {
    const ALL: [NavAction; 4] = [
        NavAction::North,
        NavAction::East,
        NavAction::South,
        NavAction::West,
    ];
}

impl Action for NavAction {
    fn index(&self) -> usize {
        *self as usize
    }
}

/// Position readout, present only inside observation areas or at the goal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavObservation {
    pub position: Option<GridPos>,
}

impl Observation for NavObservation {}

/// Transition parameters recorded on each history entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavTransition {
    pub had_collision: bool,
}

/// Grid navigation model with rectangle-based geometry changes.
pub struct NavModel {
    config: NavConfig,
    n_rows: i64,
    n_cols: i64,
    start: GridRect,
    goal: GridRect,
    obstacles: Vec<(u64, GridRect)>,
    observation_areas: Vec<(u64, GridRect)>,
    changes: BTreeMap<u64, Vec<NavChange>>,
}

impl NavModel {
    pub fn new(config: NavConfig, n_rows: i64, n_cols: i64, start: GridRect, goal: GridRect) -> Self {
        NavModel {
            config,
            n_rows,
            n_cols,
            start,
            goal,
            obstacles: Vec::new(),
            observation_areas: Vec::new(),
            changes: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacles.len()
    }

    fn in_bounds(&self, pos: GridPos) -> bool {
        pos.i >= 0 && pos.i < self.n_rows && pos.j >= 0 && pos.j < self.n_cols
    }

    pub fn is_obstructed(&self, pos: GridPos) -> bool {
        self.obstacles.iter().any(|(_, rect)| rect.contains(pos))
    }

    fn is_sensed(&self, pos: GridPos) -> bool {
        self.goal.contains(pos)
            || self
                .observation_areas
                .iter()
                .any(|(_, rect)| rect.contains(pos))
    }

    fn observe(&self, pos: GridPos) -> NavObservation {
        NavObservation {
            position: if self.is_sensed(pos) { Some(pos) } else { None },
        }
    }

    fn moved(pos: GridPos, action: NavAction) -> GridPos {
        match action {
            NavAction::North => GridPos::new(pos.i - 1, pos.j),
            NavAction::East => GridPos::new(pos.i, pos.j + 1),
            NavAction::South => GridPos::new(pos.i + 1, pos.j),
            NavAction::West => GridPos::new(pos.i, pos.j - 1),
        }
    }

    fn goal_distance(&self, pos: GridPos) -> i64 {
        let i = pos.i.clamp(self.goal.i0, self.goal.i1);
        let j = pos.j.clamp(self.goal.j0, self.goal.j1);
        pos.manhattan_distance(&GridPos::new(i, j))
    }

    fn free_cells(&self) -> Vec<GridPos> {
        (0..self.n_rows)
            .flat_map(|i| (0..self.n_cols).map(move |j| GridPos::new(i, j)))
            .filter(|&pos| !self.is_obstructed(pos))
            .collect()
    }
}

impl Model for NavModel {
    type State = NavState;
    type Action = NavAction;
    type Observation = NavObservation;
    type TransitionParams = NavTransition;
    type LegalityKey = ();

    fn discount_factor(&self) -> f64 {
        self.config.solver.discount
    }

    fn min_val(&self) -> f64 {
        -(self.config.move_cost + self.config.collision_penalty)
            / (1.0 - self.config.solver.discount)
    }

    fn max_val(&self) -> f64 {
        self.config.goal_reward
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

    fn all_actions(&self) -> Vec<NavAction> {
        NavAction::ALL.to_vec()
    }

    fn sample_init_state(&self, rng: &mut PlannerRng) -> NavState {
        let cells: Vec<GridPos> = self
            .start
            .cells()
            .filter(|&pos| !self.is_obstructed(pos))
            .collect();
        NavState {
            pos: cells[rng.gen_range(0..cells.len())],
        }
    }

    fn generate_step(
        &self,
        state: &NavState,
        action: &NavAction,
        _rng: &mut PlannerRng,
    ) -> StepResult<NavState, NavAction, NavObservation, NavTransition> {
        let target = Self::moved(state.pos, *action);
        let blocked = !self.in_bounds(target) || self.is_obstructed(target);
        let next_pos = if blocked { state.pos } else { target };

        let mut reward = -self.config.move_cost;
        if blocked {
            reward -= self.config.collision_penalty;
        }
        let is_terminal = self.goal.contains(next_pos);
        if is_terminal {
            reward += self.config.goal_reward;
        }

        StepResult {
            action: *action,
            transition: Some(NavTransition {
                had_collision: blocked,
            }),
            observation: self.observe(next_pos),
            reward,
            next_state: NavState { pos: next_pos },
            is_terminal,
        }
    }

    fn heuristic_value(&self, state: &NavState) -> f64 {
        let discount = self.config.solver.discount;
        let reach_discount = discount.powi(self.goal_distance(state.pos) as i32);
        -self.config.move_cost * (1.0 - reach_discount) / (1.0 - discount)
            + reach_discount * self.config.goal_reward
    }

    fn generate_particles_from_belief(
        &self,
        previous: &[NavState],
        action: &NavAction,
        obs: &NavObservation,
        rng: &mut PlannerRng,
    ) -> Vec<NavState> {
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
        _action: &NavAction,
        obs: &NavObservation,
        rng: &mut PlannerRng,
    ) -> Vec<NavState> {
        match obs.position {
            Some(pos) => vec![NavState { pos }; self.config.solver.n_particles],
            None => {
                let cells: Vec<GridPos> = self
                    .free_cells()
                    .into_iter()
                    .filter(|&pos| !self.is_sensed(pos))
                    .collect();
                if cells.is_empty() {
                    return Vec::new();
                }
                (0..self.config.solver.n_particles)
                    .map(|_| NavState {
                        pos: cells[rng.gen_range(0..cells.len())],
                    })
                    .collect()
            }
        }
    }

    /// Parse a change file:
    ///
    /// ```text
    /// t <time> n <count>
    /// ADD <AreaType> <id> <i0> <j0> <i1> <j1>    # repeated <count> times
    /// ```
    ///
    /// Unknown operations and area types are reported and skipped.
    fn load_changes(&mut self, path: &Path) -> Result<Vec<u64>> {
        let text = std::fs::read_to_string(path)?;
        let mut lines = text.lines();
        let mut change_times = Vec::new();
        while let Some(header) = lines.next() {
            if header.trim().is_empty() {
                continue;
            }
            let mut parts = header.split_whitespace();
            let (time, count) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some("t"), Some(t), Some("n"), Some(n)) => {
                    let time: u64 = t.parse().map_err(|_| {
                        PlannerError::IoError(format!("bad change time '{}'", t))
                    })?;
                    let count: usize = n.parse().map_err(|_| {
                        PlannerError::IoError(format!("bad change count '{}'", n))
                    })?;
                    (time, count)
                }
                _ => {
                    return Err(PlannerError::IoError(format!(
                        "bad change header '{}'",
                        header
                    )))
                }
            };
            let entry = self.changes.entry(time).or_default();
            change_times.push(time);
            for _ in 0..count {
                let Some(line) = lines.next() else {
                    return Err(PlannerError::IoError(
                        "change file ended mid-block".to_string(),
                    ));
                };
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.first() != Some(&"ADD") {
                    eprintln!(
                        "ERROR: Cannot {}",
                        fields.first().copied().unwrap_or("<empty>")
                    );
                    continue;
                }
                if fields.len() != 7 {
                    eprintln!("ERROR: Malformed change record '{}'", line);
                    continue;
                }
                let Some(area_type) = AreaType::parse(fields[1]) else {
                    let err =
                        PlannerError::ModelInconsistency(format!("area type '{}'", fields[1]));
                    eprintln!("{}", err);
                    continue;
                };
                let numbers: Option<Vec<i64>> =
                    fields[2..7].iter().map(|f| f.parse().ok()).collect();
                let Some(numbers) = numbers else {
                    eprintln!("ERROR: Malformed change record '{}'", line);
                    continue;
                };
                entry.push(NavChange {
                    area_type,
                    id: numbers[0] as u64,
                    rect: GridRect::new(numbers[1], numbers[2], numbers[3], numbers[4]),
                });
            }
        }
        Ok(change_times)
    }

    fn apply_change(
        &mut self,
        time: u64,
        pool: &mut StatePool<NavState>,
    ) -> Result<Vec<LegalityChange<()>>> {
        let changes = self.changes.get(&time).cloned().unwrap_or_default();
        for change in changes {
            let lo = array![change.rect.i0 as f64, change.rect.j0 as f64];
            let hi = array![change.rect.i1 as f64, change.rect.j1 as f64];
            let inside = pool.box_query(&lo, &hi);
            match change.area_type {
                AreaType::Obstacle => {
                    self.obstacles.push((change.id, change.rect));
                    for id in inside {
                        pool.flag_affected(id, ChangeFlags::DELETED | ChangeFlags::DEL_STATE);
                    }
                }
                AreaType::Observation => {
                    self.observation_areas.push((change.id, change.rect));
                    for id in inside {
                        pool.flag_affected(id, ChangeFlags::OBSERVATION_BEFORE);
                    }
                }
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_pool::VectorIndex;
    use rand::SeedableRng;
    use std::io::Write;

    fn model() -> NavModel {
        NavModel::new(
            NavConfig::default(),
            8,
            8,
            GridRect::new(0, 0, 1, 1),
            GridRect::new(7, 7, 7, 7),
        )
    }

    #[test]
    fn test_goal_step_is_terminal() {
        let model = model();
        let mut rng = PlannerRng::seed_from_u64(0);
        let state = NavState {
            pos: GridPos::new(6, 7),
        };
        let step = model.generate_step(&state, &NavAction::South, &mut rng);
        assert!(step.is_terminal);
        assert!(step.reward > 0.0);
        assert_eq!(step.observation.position, Some(GridPos::new(7, 7)));
    }

    #[test]
    fn test_wall_collision_records_transition() {
        let model = model();
        let mut rng = PlannerRng::seed_from_u64(0);
        let state = NavState {
            pos: GridPos::new(0, 0),
        };
        let step = model.generate_step(&state, &NavAction::North, &mut rng);
        assert_eq!(step.next_state.pos, GridPos::new(0, 0));
        assert!(step.transition.unwrap().had_collision);
        assert!(step.reward < -model.config.move_cost);
    }

    #[test]
    fn test_unsensed_cells_observe_nothing() {
        let model = model();
        let mut rng = PlannerRng::seed_from_u64(0);
        let state = NavState {
            pos: GridPos::new(3, 3),
        };
        let step = model.generate_step(&state, &NavAction::East, &mut rng);
        assert_eq!(step.observation.position, None);
    }

    #[test]
    fn test_change_file_parsing() {
        let mut model = model();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "t 5 n 3").unwrap();
        writeln!(file, "ADD Obstacle 0 3 3 4 4").unwrap();
        writeln!(file, "REMOVE Obstacle 1 0 0 1 1").unwrap();
        writeln!(file, "ADD Swamp 2 0 0 1 1").unwrap();
        writeln!(file, "t 9 n 1").unwrap();
        writeln!(file, "ADD Observation 3 0 5 7 5").unwrap();
        file.flush().unwrap();

        let times = model.load_changes(file.path()).unwrap();
        assert_eq!(times, vec![5, 9]);
        // The unknown operation and the unknown area type were skipped
        assert_eq!(model.changes[&5].len(), 1);
        assert_eq!(model.changes[&9].len(), 1);
        assert_eq!(model.changes[&5][0].area_type, AreaType::Obstacle);
    }

    #[test]
    fn test_obstacle_change_flags_deleted() {
        let mut model = model();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "t 2 n 1").unwrap();
        writeln!(file, "ADD Obstacle 0 3 3 4 4").unwrap();
        file.flush().unwrap();
        model.load_changes(file.path()).unwrap();

        let mut pool: StatePool<NavState> = StatePool::new(Box::new(VectorIndex::new()));
        let inside = pool.create_or_get_info(NavState {
            pos: GridPos::new(3, 4),
        });
        let outside = pool.create_or_get_info(NavState {
            pos: GridPos::new(0, 0),
        });

        model.apply_change(2, &mut pool).unwrap();
        assert!(pool.get(inside).change_flags.contains(ChangeFlags::DELETED));
        assert!(pool.get(outside).change_flags.is_empty());
        assert!(model.is_obstructed(GridPos::new(4, 4)));
    }

    #[test]
    fn test_observation_area_change_flags() {
        let mut model = model();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "t 1 n 1").unwrap();
        writeln!(file, "ADD Observation 0 2 0 2 7").unwrap();
        file.flush().unwrap();
        model.load_changes(file.path()).unwrap();

        let mut pool: StatePool<NavState> = StatePool::new(Box::new(VectorIndex::new()));
        let inside = pool.create_or_get_info(NavState {
            pos: GridPos::new(2, 3),
        });
        model.apply_change(1, &mut pool).unwrap();
        assert!(pool
            .get(inside)
            .change_flags
            .contains(ChangeFlags::OBSERVATION_BEFORE));
        // The area now senses position
        let mut rng = PlannerRng::seed_from_u64(0);
        let step = model.generate_step(
            &NavState {
                pos: GridPos::new(2, 2),
            },
            &NavAction::East,
            &mut rng,
        );
        assert_eq!(step.observation.position, Some(GridPos::new(2, 3)));
    }
}

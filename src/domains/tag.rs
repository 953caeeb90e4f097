//! The Tag POMDP: a robot chases an opponent that flees on a grid map.
//!
//! The robot observes its own cell and whether the opponent shares it. The
//! opponent moves away from the robot with high probability and stays put
//! otherwise. Tagging on the opponent's cell ends the episode.

use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SolverConfig;
use crate::domains::GridPos;
use crate::error::{PlannerError, Result};
use crate::model::Model;
use crate::types::{Action, Observation, State, StepResult};
use crate::PlannerRng;

/// A single-corridor map used when no map file is given.
pub const DEFAULT_MAP: &str = "\
5 5
.....
XX.XX
XX.XX
XX.XX
.....
";

/// Tag-specific options layered over the solver options.
#[derive(Clone, Debug)]
pub struct TagConfig {
    pub solver: SolverConfig,
    pub move_cost: f64,
    pub tag_reward: f64,
    pub failed_tag_penalty: f64,
    pub opponent_stay_probability: f64,
}

impl Default for TagConfig {
    fn default() -> Self {
        TagConfig {
            solver: SolverConfig::default(),
            move_cost: 1.0,
            tag_reward: 10.0,
            failed_tag_penalty: 10.0,
            opponent_stay_probability: 0.2,
        }
    }
}

impl TagConfig {
    /// Parse key/value pairs; solver keys first, then Tag keys. Unknown
    /// keys are a configuration error.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = TagConfig::default();
        for (key, value) in pairs {
            if config.solver.set(key, value)? {
                continue;
            }
            let parsed = value.parse::<f64>().map_err(|_| {
                PlannerError::invalid_config(key.to_string(), format!("cannot parse '{}'", value))
            });
            match key {
                "moveCost" => config.move_cost = parsed?,
                "tagReward" => config.tag_reward = parsed?,
                "failedTagPenalty" => config.failed_tag_penalty = parsed?,
                "opponentStayProbability" => config.opponent_stay_probability = parsed?,
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
pub struct TagState {
    pub robot: GridPos,
    pub opponent: GridPos,
    pub tagged: bool,
}

impl State for TagState {
    fn as_vector(&self) -> Array1<f64> {
        Array1::from_vec(vec![
            self.robot.i as f64,
            self.robot.j as f64,
            self.opponent.i as f64,
            self.opponent.j as f64,
            self.tagged as i64 as f64,
        ])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagAction {
    North,
    East,
    South,
    West,
    Tag,
}

impl TagAction {
    const ALL: [TagAction; 5] = [
        TagAction::North,
        TagAction::East,
        TagAction::South,
        TagAction::West,
        TagAction::Tag,
    ];
}

impl Action for TagAction {
    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagObservation {
    /// The robot's own cell, always observed exactly.
    pub position: GridPos,
    /// Whether the opponent shares the robot's cell.
    pub seen: bool,
}

impl Observation for TagObservation {}

/// The Tag model over a text map (`X` marks walls).
pub struct TagModel {
    config: TagConfig,
    n_rows: i64,
    n_cols: i64,
    walls: Vec<Vec<bool>>,
    empty_cells: Vec<GridPos>,
}

impl TagModel {
    pub fn new(config: TagConfig) -> Result<Self> {
        let text = match &config.solver.map_path {
            Some(path) => std::fs::read_to_string(path)?,
            None => DEFAULT_MAP.to_string(),
        };
        Self::from_map_text(config, &text)
    }

    pub fn from_map_text(config: TagConfig, text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| PlannerError::IoError("empty map file".to_string()))?;
        let mut parts = header.split_whitespace();
        let n_rows: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PlannerError::IoError("bad map header".to_string()))?;
        let n_cols: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PlannerError::IoError("bad map header".to_string()))?;

        let mut walls = Vec::with_capacity(n_rows as usize);
        let mut empty_cells = Vec::new();
        for i in 0..n_rows {
            let line = lines
                .next()
                .ok_or_else(|| PlannerError::IoError(format!("map row {} missing", i)))?;
            let mut row = Vec::with_capacity(n_cols as usize);
            for j in 0..n_cols {
                let wall = line.chars().nth(j as usize) == Some('X');
                if !wall {
                    empty_cells.push(GridPos::new(i, j));
                }
                row.push(wall);
            }
            walls.push(row);
        }
        if empty_cells.is_empty() {
            return Err(PlannerError::IoError("map has no empty cells".to_string()));
        }
        Ok(TagModel {
            config,
            n_rows,
            n_cols,
            walls,
            empty_cells,
        })
    }

    pub fn config(&self) -> &TagConfig {
        &self.config
    }

    fn is_valid(&self, pos: GridPos) -> bool {
        pos.i >= 0
            && pos.i < self.n_rows
            && pos.j >= 0
            && pos.j < self.n_cols
            && !self.walls[pos.i as usize][pos.j as usize]
    }

    fn moved(pos: GridPos, action: TagAction) -> GridPos {
        match action {
            TagAction::North => GridPos::new(pos.i - 1, pos.j),
            TagAction::East => GridPos::new(pos.i, pos.j + 1),
            TagAction::South => GridPos::new(pos.i + 1, pos.j),
            TagAction::West => GridPos::new(pos.i, pos.j - 1),
            TagAction::Tag => pos,
        }
    }

    fn random_empty_cell(&self, rng: &mut PlannerRng) -> GridPos {
        self.empty_cells[rng.gen_range(0..self.empty_cells.len())]
    }

    /// Candidate flight moves, doubled away from the robot on each axis.
    fn opponent_moves(robot: GridPos, opponent: GridPos) -> Vec<TagAction> {
        let mut moves = Vec::with_capacity(4);
        if robot.i > opponent.i {
            moves.extend([TagAction::North, TagAction::North]);
        } else if robot.i < opponent.i {
            moves.extend([TagAction::South, TagAction::South]);
        } else {
            moves.extend([TagAction::North, TagAction::South]);
        }
        if robot.j > opponent.j {
            moves.extend([TagAction::West, TagAction::West]);
        } else if robot.j < opponent.j {
            moves.extend([TagAction::East, TagAction::East]);
        } else {
            moves.extend([TagAction::East, TagAction::West]);
        }
        moves
    }

    fn move_opponent(&self, robot: GridPos, opponent: GridPos, rng: &mut PlannerRng) -> GridPos {
        if rng.gen::<f64>() < self.config.opponent_stay_probability {
            return opponent;
        }
        let moves = Self::opponent_moves(robot, opponent);
        let chosen = moves[rng.gen_range(0..moves.len())];
        let target = Self::moved(opponent, chosen);
        if self.is_valid(target) {
            target
        } else {
            opponent
        }
    }

    fn observe(state: &TagState) -> TagObservation {
        TagObservation {
            position: state.robot,
            seen: state.robot == state.opponent,
        }
    }
}

impl Model for TagModel {
    type State = TagState;
    type Action = TagAction;
    type Observation = TagObservation;
    type TransitionParams = ();
    type LegalityKey = ();

    fn discount_factor(&self) -> f64 {
        self.config.solver.discount
    }

    fn min_val(&self) -> f64 {
        -self.config.failed_tag_penalty / (1.0 - self.config.solver.discount)
    }

    fn max_val(&self) -> f64 {
        self.config.tag_reward
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

    fn all_actions(&self) -> Vec<TagAction> {
        TagAction::ALL.to_vec()
    }

    fn sample_init_state(&self, rng: &mut PlannerRng) -> TagState {
        TagState {
            robot: self.random_empty_cell(rng),
            opponent: self.random_empty_cell(rng),
            tagged: false,
        }
    }

    fn generate_step(
        &self,
        state: &TagState,
        action: &TagAction,
        rng: &mut PlannerRng,
    ) -> StepResult<TagState, TagAction, TagObservation, ()> {
        let reward = if *action == TagAction::Tag {
            if state.robot == state.opponent {
                self.config.tag_reward
            } else {
                -self.config.failed_tag_penalty
            }
        } else {
            -self.config.move_cost
        };

        let next_state = if *action == TagAction::Tag && state.robot == state.opponent {
            TagState {
                robot: state.robot,
                opponent: state.opponent,
                tagged: true,
            }
        } else {
            let opponent = self.move_opponent(state.robot, state.opponent, rng);
            let target = Self::moved(state.robot, *action);
            let robot = if self.is_valid(target) {
                target
            } else {
                state.robot
            };
            TagState {
                robot,
                opponent,
                tagged: false,
            }
        };

        let observation = Self::observe(&next_state);
        let is_terminal = next_state.tagged;
        StepResult {
            action: *action,
            transition: None,
            observation,
            reward,
            next_state,
            is_terminal,
        }
    }

    fn heuristic_value(&self, state: &TagState) -> f64 {
        if state.tagged {
            return 0.0;
        }
        let discount = self.config.solver.discount;
        let distance = state.robot.manhattan_distance(&state.opponent);
        let reach_discount = discount.powi(distance as i32);
        // Pay move costs on the way, then collect the tag reward
        -self.config.move_cost * (1.0 - reach_discount) / (1.0 - discount)
            + reach_discount * self.config.tag_reward
    }

    fn generate_particles_from_belief(
        &self,
        previous: &[TagState],
        action: &TagAction,
        obs: &TagObservation,
        rng: &mut PlannerRng,
    ) -> Vec<TagState> {
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
        _action: &TagAction,
        obs: &TagObservation,
        rng: &mut PlannerRng,
    ) -> Vec<TagState> {
        let mut particles = Vec::with_capacity(self.config.solver.n_particles);
        for _ in 0..self.config.solver.n_particles {
            let opponent = if obs.seen {
                obs.position
            } else {
                // Any other empty cell is consistent with not seeing them
                let mut cell = self.random_empty_cell(rng);
                let mut guard = 0;
                while cell == obs.position && guard < 100 {
                    cell = self.random_empty_cell(rng);
                    guard += 1;
                }
                cell
            };
            particles.push(TagState {
                robot: obs.position,
                opponent,
                tagged: false,
            });
        }
        particles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn model() -> TagModel {
        TagModel::new(TagConfig::default()).unwrap()
    }

    #[test]
    fn test_default_map_loads() {
        let model = model();
        assert_eq!(model.n_rows, 5);
        assert_eq!(model.n_cols, 5);
        // Corridor map: two full rows plus the connecting column
        assert_eq!(model.empty_cells.len(), 13);
    }

    #[test]
    fn test_successful_tag_is_terminal() {
        let model = model();
        let mut rng = PlannerRng::seed_from_u64(0);
        let state = TagState {
            robot: GridPos::new(0, 2),
            opponent: GridPos::new(0, 2),
            tagged: false,
        };
        let step = model.generate_step(&state, &TagAction::Tag, &mut rng);
        assert!(step.is_terminal);
        assert_eq!(step.reward, model.config.tag_reward);
        assert!(step.next_state.tagged);
        assert!(step.observation.seen);
    }

    #[test]
    fn test_failed_tag_penalized_not_terminal() {
        let model = model();
        let mut rng = PlannerRng::seed_from_u64(0);
        let state = TagState {
            robot: GridPos::new(0, 0),
            opponent: GridPos::new(4, 4),
            tagged: false,
        };
        let step = model.generate_step(&state, &TagAction::Tag, &mut rng);
        assert!(!step.is_terminal);
        assert_eq!(step.reward, -model.config.failed_tag_penalty);
    }

    #[test]
    fn test_walls_block_movement() {
        let model = model();
        let mut rng = PlannerRng::seed_from_u64(0);
        let state = TagState {
            robot: GridPos::new(0, 0),
            opponent: GridPos::new(4, 4),
            tagged: false,
        };
        // South of (0,0) is a wall on the default map
        let step = model.generate_step(&state, &TagAction::South, &mut rng);
        assert_eq!(step.next_state.robot, GridPos::new(0, 0));
    }

    #[test]
    fn test_opponent_flees_away() {
        let model = model();
        let robot = GridPos::new(0, 0);
        let opponent = GridPos::new(0, 2);
        let moves = TagModel::opponent_moves(robot, opponent);
        // Robot is west of the opponent: no West candidates at all
        assert!(!moves.contains(&TagAction::West));
        assert_eq!(moves.iter().filter(|&&m| m == TagAction::East).count(), 2);
    }

    #[test]
    fn test_informed_particles_match_observation() {
        let model = model();
        let mut rng = PlannerRng::seed_from_u64(7);
        let previous: Vec<TagState> = (0..50)
            .map(|_| model.sample_init_state(&mut rng))
            .collect();
        let obs = TagObservation {
            position: GridPos::new(1, 2),
            seen: false,
        };
        let particles =
            model.generate_particles_from_belief(&previous, &TagAction::North, &obs, &mut rng);
        for p in &particles {
            assert_eq!(p.robot, obs.position);
            assert_ne!(p.opponent, p.robot);
        }
    }

    #[test]
    fn test_uninformed_particles_respect_seen_flag() {
        let model = model();
        let mut rng = PlannerRng::seed_from_u64(7);
        let obs = TagObservation {
            position: GridPos::new(4, 0),
            seen: true,
        };
        let particles = model.generate_particles(&TagAction::North, &obs, &mut rng);
        assert_eq!(particles.len(), model.config.solver.n_particles);
        for p in &particles {
            assert_eq!(p.opponent, obs.position);
        }
    }

    #[test]
    fn test_config_rejects_unknown_key() {
        let result = TagConfig::from_pairs(vec![("tagBonus", "3")]);
        assert!(result.is_err());
        let config =
            TagConfig::from_pairs(vec![("tagReward", "25"), ("discount", "0.9")]).unwrap();
        assert_eq!(config.tag_reward, 25.0);
        assert_eq!(config.solver.discount, 0.9);
    }
}

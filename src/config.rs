//! Planner configuration.
//!
//! Options arrive as textual key/value pairs (from the command line or a
//! config file). Unknown keys are a configuration error and abort before
//! search starts; domain models layer their own keys on top by consulting
//! [`SolverConfig::set`] first and handling the leftovers themselves.

use crate::error::{PlannerError, Result};

/// Search and belief parameters shared by every model.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverConfig {
    /// POMDP discount factor in (0, 1].
    pub discount: f64,
    /// Number of search trials per improvement call.
    pub max_trials: u64,
    /// Maximum tree depth for a single trial.
    pub max_depth: u64,
    /// Particle budget for belief synthesis.
    pub n_particles: usize,
    /// UCB exploration coefficient.
    pub ucb_explore_coefficient: f64,
    /// Exploration coefficient of the adaptive rollout mixture.
    pub heuristic_explore_coefficient: f64,
    /// Cap on nodes scanned per nearest-neighbour belief lookup.
    pub max_nn_comparisons: u64,
    /// Beyond this belief distance a neighbour is not usable.
    pub max_nn_distance: f64,
    /// Matching threshold for continuous observations.
    pub max_observation_distance: f64,
    /// Path to the map file, for models that load one.
    pub map_path: Option<String>,
    /// Seed for the deterministic generator.
    pub seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            discount: 0.95,
            max_trials: 1000,
            max_depth: 100,
            n_particles: 1000,
            ucb_explore_coefficient: 200.0,
            heuristic_explore_coefficient: 0.5,
            max_nn_comparisons: 50,
            max_nn_distance: 20.0,
            max_observation_distance: 0.0,
            map_path: None,
            seed: 0,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        PlannerError::invalid_config(key.to_string(), format!("cannot parse '{}'", value))
    })
}

impl SolverConfig {
    /// Apply one key/value pair. Returns `Ok(false)` when the key is not a
    /// solver option, so callers can try their domain-specific keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "discount" => self.discount = parse(key, value)?,
            "maxTrials" => self.max_trials = parse(key, value)?,
            "maxDepth" => self.max_depth = parse(key, value)?,
            "nParticles" => self.n_particles = parse(key, value)?,
            "ucbExploreCoefficient" => self.ucb_explore_coefficient = parse(key, value)?,
            "heuristicExploreCoefficient" => {
                self.heuristic_explore_coefficient = parse(key, value)?
            }
            "maxNnComparisons" => self.max_nn_comparisons = parse(key, value)?,
            "maxNnDistance" => self.max_nn_distance = parse(key, value)?,
            "maxObservationDistance" => self.max_observation_distance = parse(key, value)?,
            "mapPath" => self.map_path = Some(value.to_string()),
            "seed" => self.seed = parse(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Build a configuration from key/value pairs, rejecting unknown keys.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = SolverConfig::default();
        for (key, value) in pairs {
            if !config.set(key, value)? {
                return Err(PlannerError::invalid_config(
                    key.to_string(),
                    "unrecognized option".to_string(),
                ));
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges. Called once before search starts.
    pub fn validate(&self) -> Result<()> {
        if self.discount <= 0.0 || self.discount > 1.0 {
            return Err(PlannerError::invalid_config(
                "discount",
                "must be in (0, 1]",
            ));
        }
        if self.heuristic_explore_coefficient < 0.0 || self.heuristic_explore_coefficient > 1.0 {
            return Err(PlannerError::invalid_config(
                "heuristicExploreCoefficient",
                "must be in [0, 1]",
            ));
        }
        if self.ucb_explore_coefficient < 0.0 {
            return Err(PlannerError::invalid_config(
                "ucbExploreCoefficient",
                "must be non-negative",
            ));
        }
        if self.max_nn_distance < 0.0 {
            return Err(PlannerError::invalid_config(
                "maxNnDistance",
                "must be non-negative",
            ));
        }
        Ok(())
    }
}

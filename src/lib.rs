//! # Metis - Online Anytime POMDP Planning with Incremental Repair
//!
//! Metis is an online planner for Partially Observable Markov Decision
//! Processes built on Monte-Carlo belief-tree search with particle beliefs.
//! It interleaves policy improvement (search trials from the current
//! belief) with policy execution (act, observe, step the belief), and it
//! survives model change: when the environment's transition, observation,
//! or reward structure mutates mid-episode, the affected portion of the
//! search tree is repaired in place rather than rebuilt.
//!
//! ## Key Features
//!
//! - **Belief tree**: belief nodes keyed by action-observation edges,
//!   carrying particle sets and Q-value statistics
//! - **Persistent histories**: every simulated trajectory is kept, so its
//!   contribution can be un-applied and replayed after a model change
//! - **Adaptive rollouts**: a heuristic rollout and a nearest-neighbour
//!   policy transplant, mixed by online exponential-weights learning
//! - **Change engine**: collect affected histories, undo their backups,
//!   revise them against the new model, re-integrate
//! - **Determinism**: a single seeded generator threads the core and the
//!   model; identical seeds give identical runs, and snapshots capture the
//!   full generator state
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metis::domains::tag::{TagConfig, TagModel};
//! use metis::simulation::run_episode;
//! use metis::solver::Solver;
//!
//! let model = TagModel::new(TagConfig::default()).unwrap();
//! let mut solver = Solver::new(model, 42).unwrap();
//! let result = run_episode(&mut solver, 20, &[], false).unwrap();
//! println!("discounted return: {}", result.discounted_return);
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - agent façade holding the current belief
//! - [`belief`] - belief nodes and the belief tree
//! - [`changes`] - change-flag bitset
//! - [`config`] - option parsing and validation
//! - [`domains`] - benchmark POMDP models (Tag, navigation, rocks)
//! - [`error`] - error types and result handling
//! - [`history`] - trajectory storage
//! - [`mappings`] - per-node action/observation bookkeeping
//! - [`model`] - the model contract the core depends on
//! - [`serialization`] - snapshot save/restore
//! - [`simulation`] - episode execution with change epochs
//! - [`solver`] - search driver, rollouts, and the change engine
//! - [`state_pool`] - canonical state storage and spatial indexing
//! - [`types`] - capability traits for states, actions, observations

pub mod agent;
pub mod belief;
pub mod changes;
pub mod config;
pub mod domains;
pub mod error;
pub mod history;
pub mod mappings;
pub mod model;
pub mod serialization;
pub mod simulation;
pub mod solver;
pub mod state_pool;
pub mod types;

/// The deterministic generator threaded through the core and the model.
///
/// ChaCha is used because its full stream state serializes, which snapshot
/// round-tripping requires.
pub type PlannerRng = rand_chacha::ChaCha8Rng;

pub use agent::Agent;
pub use error::{PlannerError, Result};
pub use model::Model;
pub use solver::Solver;

//! Episode execution.
//!
//! Drives one episode against the true (hidden) state: improve the policy
//! at the current belief, commit to an action, observe, and step the belief,
//! applying scheduled model changes as their epochs arrive. Per-step
//! diagnostics go to stdout when verbose; warnings go to stderr.

use crate::changes::ChangeFlags;
use crate::error::{PlannerError, Result};
use crate::model::Model;
use crate::solver::change::ChangeReport;
use crate::solver::Solver;
use crate::types::Action;

/// One executed step of an episode.
#[derive(Clone, Debug)]
pub struct StepRecord<S, A, O> {
    pub state: S,
    pub action: A,
    pub observation: O,
    pub reward: f64,
}

/// The outcome of one episode.
#[derive(Clone, Debug)]
pub struct SimulationResult<S, A, O> {
    pub records: Vec<StepRecord<S, A, O>>,
    pub final_state: S,
    pub discounted_return: f64,
    /// Steps actually executed before termination or the step bound.
    pub actual_steps: u64,
    pub reached_terminal: bool,
    /// Change-engine summaries per change epoch, in order.
    pub change_reports: Vec<(u64, ChangeReport)>,
}

/// Run one episode of up to `n_steps` steps, applying model changes at the
/// given epochs.
pub fn run_episode<M: Model>(
    solver: &mut Solver<M>,
    n_steps: u64,
    change_times: &[u64],
    verbose: bool,
) -> Result<SimulationResult<M::State, M::Action, M::Observation>> {
    let discount_factor = solver.model.discount_factor();
    let max_trials = solver.model.max_trials();
    let max_depth = solver.model.max_depth();

    let mut state = solver.model.sample_init_state(&mut solver.rng);
    let mut node = solver.root();
    let mut current_discount = 1.0;
    let mut discounted_return = 0.0;
    let mut records = Vec::new();
    let mut change_reports = Vec::new();
    let mut reached_terminal = false;
    let mut actual_steps = n_steps;

    if verbose {
        println!("Initial state: {:?}", state);
    }

    for t in 0..n_steps {
        if verbose {
            println!("t-{}", t);
        }
        let state_id = solver.pool.create_or_get_info(state.clone());

        if change_times.contains(&t) {
            if verbose {
                println!("Model changing.");
            }
            let legality = solver.update_model(t)?;
            if solver
                .pool
                .get(state_id)
                .change_flags
                .contains(ChangeFlags::DELETED)
            {
                return Err(PlannerError::invariant(
                    "current simulation state was deleted by a model change",
                ));
            }
            let report = solver.apply_changes(&legality)?;
            solver.pool.reset_affected_states();
            if verbose {
                println!(
                    "Changes complete: {} sequences revised, {} deleted",
                    report.affected_sequences, report.deleted_sequences
                );
            }
            change_reports.push((t, report));
        }

        solver.improve(node, max_trials, max_depth)?;

        // Sampled for diagnostics only; the committed action comes from the
        // node's statistics and the step runs against the true state.
        let sampled = solver.tree.node(node).sample_particle(&mut solver.rng);
        if verbose {
            if let Some(r) = sampled {
                let particle = solver.pool.state(solver.histories.entry(r).state);
                println!("Sampled particle: {:?}", particle);
            }
        }

        let action_index = solver
            .tree
            .node(node)
            .action_map
            .recommended_action()
            .or_else(|| solver.tree.node_mut(node).action_map.next_action_to_try())
            .ok_or_else(|| PlannerError::invariant("belief node offers no action to execute"))?;
        let action = solver.actions[action_index].clone();
        let step = solver.model.generate_step(&state, &action, &mut solver.rng);

        discounted_return += current_discount * step.reward;
        current_discount *= discount_factor;
        if verbose {
            println!(
                "Action: {:?}; Reward: {}; Obs: {:?}",
                step.action, step.reward, step.observation
            );
            println!(
                "Discount: {}; Total Reward: {}",
                current_discount, discounted_return
            );
        }

        records.push(StepRecord {
            state: state.clone(),
            action: step.action.clone(),
            observation: step.observation.clone(),
            reward: step.reward,
        });

        if step.is_terminal {
            if verbose {
                println!("Reached a terminal state.");
            }
            actual_steps = t;
            reached_terminal = true;
            state = step.next_state;
            break;
        }

        node = match solver.tree.get_child(node, step.action.index(), &step.observation) {
            Some(child) if solver.tree.node(child).particle_count() > 0 => child,
            _ => solver.add_child(node, &step.action, &step.observation, t)?,
        };
        state = step.next_state;
    }

    Ok(SimulationResult {
        records,
        final_state: state,
        discounted_return,
        actual_steps,
        reached_terminal,
        change_reports,
    })
}

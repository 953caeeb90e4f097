//! Property tests for the planner's core invariants.

use metis::domains::tag::{TagConfig, TagModel};
use metis::domains::GridPos;
use metis::mappings::ActionMapping;
use metis::solver::rollout::{RolloutCoordinator, RolloutMode};
use metis::solver::Solver;
use proptest::prelude::*;

fn small_tag_solver(seed: u64, max_trials: u64) -> Solver<TagModel> {
    let mut config = TagConfig::default();
    config.solver.max_trials = max_trials;
    config.solver.max_depth = 10;
    config.solver.n_particles = 50;
    config.solver.max_nn_comparisons = 5;
    let map = "3 3\n...\n...\n...\n";
    let model = TagModel::from_map_text(config, map).unwrap();
    let mut solver = Solver::new(model, seed).unwrap();
    let root = solver.root();
    solver.improve(root, max_trials, 10).unwrap();
    solver
}

/// Per-node, per-action Q statistics captured for comparison.
fn q_table(solver: &Solver<TagModel>) -> Vec<(i64, f64, bool)> {
    let mut table = Vec::new();
    for node in solver.tree().all_nodes() {
        let map = &solver.tree().node(node).action_map;
        for action in 0..map.action_count() {
            let entry = map.entry(action);
            table.push((entry.visits, entry.total_q, entry.legal));
        }
    }
    table
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// meanQ * visits recovers totalQ for every visited action.
    #[test]
    fn test_mean_q_times_visits_is_total_q(seed in 0u64..500) {
        let solver = small_tag_solver(seed, 30);
        for node in solver.tree().all_nodes() {
            let map = &solver.tree().node(node).action_map;
            for action in 0..map.action_count() {
                let entry = map.entry(action);
                if let Some(mean) = entry.mean_q() {
                    let recovered = mean * entry.visits as f64;
                    prop_assert!((recovered - entry.total_q).abs() < 1e-9_f64.max(entry.total_q.abs() * 1e-12));
                }
            }
        }
    }

    /// After backup, each entry's cached total satisfies the suffix
    /// recurrence total[i] = discount[i] * reward[i] + total[i + 1], and the
    /// frontier entry never has an action.
    #[test]
    fn test_total_discounted_reward_suffix_sums(seed in 0u64..500) {
        let solver = small_tag_solver(seed, 30);
        for sequence in solver.histories().iter() {
            let entries = &sequence.entries;
            prop_assert!(entries.last().unwrap().action.is_none());
            for i in 0..entries.len().saturating_sub(1) {
                let expected = entries[i].discount * entries[i].reward
                    + entries[i + 1].total_discounted_reward;
                prop_assert!((entries[i].total_discounted_reward - expected).abs() < 1e-9);
            }
        }
    }

    /// undo-backup followed by backup restores every Q sum, every visit
    /// count, and every backed-up flag.
    #[test]
    fn test_backup_undo_roundtrip(seed in 0u64..500) {
        let mut solver = small_tag_solver(seed, 30);
        let before = q_table(&solver);
        let ids: Vec<usize> = solver.histories().iter().map(|s| s.id()).collect();

        for &id in &ids {
            solver.undo_backup(id).unwrap();
        }
        // Every interior entry's flag is now clear
        for sequence in solver.histories().iter() {
            for entry in &sequence.entries[..sequence.len() - 1] {
                prop_assert!(!entry.has_been_backed_up);
            }
        }
        for &id in &ids {
            solver.backup(id).unwrap();
        }

        let after = q_table(&solver);
        prop_assert_eq!(before.len(), after.len());
        for ((v1, q1, l1), (v2, q2, l2)) in before.into_iter().zip(after) {
            prop_assert_eq!(v1, v2);
            prop_assert_eq!(l1, l2);
            prop_assert!((q1 - q2).abs() < 1e-9_f64.max(q1.abs() * 1e-12));
        }
        for sequence in solver.histories().iter() {
            for entry in &sequence.entries[..sequence.len() - 1] {
                prop_assert!(entry.has_been_backed_up);
            }
        }
    }

    /// State back-references and node particle lists stay complete through
    /// arbitrary amounts of search.
    #[test]
    fn test_back_reference_completeness(seed in 0u64..500, trials in 1u64..60) {
        let solver = small_tag_solver(seed, trials);
        prop_assert!(solver.check_consistency().is_ok());
    }

    /// The rollout mixture stays a strictly positive distribution through
    /// arbitrary update sequences.
    #[test]
    fn test_rollout_mixture_stays_normalized(
        updates in prop::collection::vec((0u8..2, 0.0f64..20.0, 1.0f64..10.0), 1..50),
    ) {
        let mut coordinator = RolloutCoordinator::new(0.5);
        for (mode, improvement, cost) in updates {
            let mode = if mode == 0 {
                RolloutMode::RandHeuristic
            } else {
                RolloutMode::PolicyTransplant
            };
            coordinator.record(mode, cost);
            coordinator.update_probabilities(improvement, 10.0);
            let p = coordinator.probabilities();
            prop_assert!((p[0] + p[1] - 1.0).abs() < 1e-9);
            prop_assert!(p[0] > 0.0 && p[1] > 0.0);
        }
    }

    /// UCB never returns an illegal action; the recommendation never does
    /// either.
    #[test]
    fn test_illegal_actions_never_selected(
        legal in prop::collection::vec(any::<bool>(), 2..8),
        visits in prop::collection::vec(1i64..50, 2..8),
        totals in prop::collection::vec(-50.0f64..50.0, 2..8),
    ) {
        let n = legal.len().min(visits.len()).min(totals.len());
        if !legal[..n].iter().any(|&l| l) {
            return Ok(());
        }
        let mut mapping: ActionMapping<usize> = ActionMapping::with_legality(legal[..n].to_vec());
        for i in 0..n {
            mapping.update_q(i, totals[i], visits[i]);
        }
        if let Some(chosen) = mapping.ucb_action(5.0) {
            prop_assert!(legal[chosen]);
        }
        if let Some(chosen) = mapping.recommended_action() {
            prop_assert!(legal[chosen]);
        }
    }
}

/// Pool canonicalization is idempotent across interleavings.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_state_pool_canonicalization(cells in prop::collection::vec((0i64..4, 0i64..4), 1..40)) {
        use metis::domains::tag::TagState;
        use metis::state_pool::{StatePool, VectorIndex};

        let mut pool: StatePool<TagState> = StatePool::new(Box::new(VectorIndex::new()));
        let mut seen = std::collections::HashMap::new();
        for (i, j) in cells {
            let state = TagState {
                robot: GridPos::new(i, j),
                opponent: GridPos::new(j, i),
                tagged: false,
            };
            let id = pool.create_or_get_info(state.clone());
            if let Some(&prior) = seen.get(&state) {
                prop_assert_eq!(prior, id);
            }
            seen.insert(state, id);
        }
        prop_assert_eq!(pool.len(), seen.len());
    }
}

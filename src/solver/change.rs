//! Incremental repair after model change.
//!
//! The change engine runs in phases with hard barriers between them: every
//! affected sequence is fully undone before any is revised, and fully
//! revised before any is reintegrated. The phases are:
//!
//! 1. **Collect** - propagate state change flags to the history entries
//!    referencing them, and gather the affected sequences
//! 2. **Undo** - subtract each affected sequence's backup contribution
//! 3. **Purge** - delete sequences whose very first state was deleted
//! 4. **Revise** - re-simulate each affected span against the revised model
//! 5. **Relink** - refresh stale belief-node links along revised sequences
//! 6. **Reintegrate** - back up terminal sequences, continue searching the
//!    others

use std::collections::BTreeSet;

use crate::changes::ChangeFlags;
use crate::error::{PlannerError, Result};
use crate::history::EntryRef;
use crate::model::{LegalityChange, Model};
use crate::solver::{HistoriesOf, Solver, TreeOf};
use crate::state_pool::StatePool;
use crate::types::{Action, NodeId, SeqId, StateId};
use crate::PlannerRng;

/// Summary of one change-engine pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChangeReport {
    /// Sequences that were undone and revised.
    pub affected_sequences: usize,
    /// Sequences deleted because their start state vanished.
    pub deleted_sequences: usize,
}

/// Mutable view of the planner state handed to a history corrector.
pub struct CorrectionContext<'a, M: Model> {
    pub model: &'a M,
    pub actions: &'a [M::Action],
    pub pool: &'a mut StatePool<M::State>,
    pub histories: &'a mut HistoriesOf<M>,
    pub tree: &'a mut TreeOf<M>,
    pub rng: &'a mut PlannerRng,
}

impl<'a, M: Model> CorrectionContext<'a, M> {
    /// Swap the canonical state an entry points at, keeping back-references
    /// complete.
    pub fn set_entry_state(&mut self, entry: EntryRef, state: StateId) {
        let old = self.histories.entry(entry).state;
        if old == state {
            return;
        }
        self.pool.deregister_entry(old, entry);
        self.histories.entry_mut(entry).state = state;
        self.pool.register_entry(state, entry);
    }

    /// Drop every entry after `last`, de-registering them, and turn the
    /// entry at `last` into a terminal frontier entry.
    pub fn truncate_after(&mut self, seq: SeqId, last: usize) {
        let len = self.histories[seq].len();
        for index in (last + 1)..len {
            let (state, node) = {
                let entry = &self.histories[seq].entries[index];
                (entry.state, entry.node)
            };
            let r = EntryRef { seq, index };
            self.pool.deregister_entry(state, r);
            self.tree.remove_particle(node, r);
        }
        let sequence = &mut self.histories[seq];
        sequence.entries.truncate(last + 1);
        sequence.is_terminal = true;
        let entry = &mut sequence.entries[last];
        entry.action = None;
        entry.observation = None;
        entry.transition = None;
        entry.reward = 0.0;
        entry.total_discounted_reward = 0.0;
    }
}

/// Repairs affected history sequences against the revised model.
pub trait HistoryCorrector<M: Model>: Send {
    /// Revise each affected sequence to be model-consistent and set its
    /// `invalid_links_start` to the earliest repaired index.
    fn revise(
        &mut self,
        ctx: &mut CorrectionContext<'_, M>,
        affected: &BTreeSet<SeqId>,
    ) -> Result<()>;
}

/// Re-simulates the affected span of each sequence, keeping the recorded
/// actions and regenerating observations, rewards, and successor states.
pub struct DefaultCorrector;

impl<M: Model> HistoryCorrector<M> for DefaultCorrector {
    fn revise(
        &mut self,
        ctx: &mut CorrectionContext<'_, M>,
        affected: &BTreeSet<SeqId>,
    ) -> Result<()> {
        for &seq in affected {
            let Some(first) = ctx.histories[seq].first_affected_entry() else {
                ctx.histories[seq].invalid_links_start = None;
                continue;
            };
            let mut index = first;
            while index + 1 < ctx.histories[seq].len() {
                let Some(action) = ctx.histories[seq].entries[index].action.clone() else {
                    break;
                };
                let state = ctx
                    .pool
                    .state(ctx.histories[seq].entries[index].state)
                    .clone();
                let step = ctx.model.generate_step(&state, &action, ctx.rng);
                {
                    let entry = &mut ctx.histories[seq].entries[index];
                    entry.reward = step.reward;
                    entry.observation = Some(step.observation.clone());
                    entry.transition = step.transition.clone();
                }
                let next = ctx.pool.create_or_get_info(step.next_state);
                ctx.set_entry_state(
                    EntryRef {
                        seq,
                        index: index + 1,
                    },
                    next,
                );
                if step.is_terminal {
                    ctx.truncate_after(seq, index + 1);
                    break;
                }
                if index + 2 == ctx.histories[seq].len() {
                    // The frontier was reached without a terminal step
                    ctx.histories[seq].is_terminal = false;
                }
                index += 1;
            }
            ctx.histories[seq].invalid_links_start = Some(first);
        }
        Ok(())
    }
}

impl<M: Model> Solver<M> {
    /// Ask the model to mutate itself for the change scheduled at `time`,
    /// flagging affected states through the pool.
    pub fn update_model(&mut self, time: u64) -> Result<Vec<LegalityChange<M::LegalityKey>>> {
        self.model.apply_change(time, &mut self.pool)
    }

    /// Run the full repair pass over every history touching an affected
    /// state. Call after [`Solver::update_model`]; the caller resets the
    /// pool's affected set afterwards.
    pub fn apply_changes(
        &mut self,
        legality: &[LegalityChange<M::LegalityKey>],
    ) -> Result<ChangeReport> {
        // Phase 1: collect affected sequences, propagating flags.
        let mut affected: BTreeSet<SeqId> = BTreeSet::new();
        let affected_states: Vec<StateId> = self.pool.affected_states().collect();
        for state_id in affected_states {
            let flags = self.pool.get(state_id).change_flags;
            let entries: Vec<EntryRef> =
                self.pool.get(state_id).referencing_entries().copied().collect();
            for r in entries {
                self.histories[r.seq].set_change_flags(r.index, flags);
                let entry_flags = self.histories[r.seq].entries[r.index].change_flags;
                if entry_flags.contains(ChangeFlags::DELETED) && r.index > 0 {
                    // The transition into a deleted state now lands in void
                    self.histories[r.seq].set_change_flags(r.index - 1, ChangeFlags::TRANSITION);
                }
                if entry_flags.contains(ChangeFlags::OBSERVATION_BEFORE) && r.index > 0 {
                    self.histories[r.seq].set_change_flags(r.index - 1, ChangeFlags::OBSERVATION);
                }
                affected.insert(r.seq);
            }
        }

        // Legality flips apply to mappings under the declared key, but only
        // where the owning belief node is itself affected; new mappings pick
        // up the revised legality from the model directly.
        if !legality.is_empty() {
            let affected_nodes: BTreeSet<NodeId> = affected
                .iter()
                .flat_map(|&seq| self.histories[seq].entries.iter().map(|e| e.node))
                .collect();
            for change in legality {
                let nodes: Vec<NodeId> = self.legal_pool.nodes_for(&change.key).to_vec();
                for node in nodes {
                    if affected_nodes.contains(&node) {
                        self.tree
                            .node_mut(node)
                            .action_map
                            .set_legal(change.action, change.legal);
                    }
                }
            }
        }

        // Phase 2: undo every affected sequence before touching any of them.
        for &seq in &affected {
            self.undo_backup(seq)?;
        }

        // Phase 3: purge sequences whose start state was deleted.
        let doomed: Vec<SeqId> = affected
            .iter()
            .copied()
            .filter(|&seq| {
                self.histories[seq].entries[0]
                    .change_flags
                    .contains(ChangeFlags::DELETED)
            })
            .collect();
        for seq in &doomed {
            affected.remove(seq);
            self.delete_sequence(*seq);
        }

        // Phase 4: revise.
        let mut corrector = self.model.create_history_corrector();
        {
            let mut ctx = CorrectionContext {
                model: &self.model,
                actions: &self.actions,
                pool: &mut self.pool,
                histories: &mut self.histories,
                tree: &mut self.tree,
                rng: &mut self.rng,
            };
            corrector.revise(&mut ctx, &affected)?;
        }

        // Phases 5 and 6: relink, then reintegrate.
        let max_depth = self.model.max_depth();
        for &seq in &affected {
            self.fix_links(seq)?;
            self.histories[seq].reset_change_flags();
            if self.histories[seq].is_terminal {
                self.backup(seq)?;
            } else {
                self.continue_search(seq, max_depth)?;
            }
        }

        Ok(ChangeReport {
            affected_sequences: affected.len(),
            deleted_sequences: doomed.len(),
        })
    }

    /// Walk a revised sequence forward from its first stale link and refresh
    /// each entry's owning belief node.
    fn fix_links(&mut self, seq: SeqId) -> Result<()> {
        let Some(start) = self.histories[seq].invalid_links_start else {
            return Ok(());
        };
        let len = self.histories[seq].len();
        for index in start..len.saturating_sub(1) {
            let (node, action_index, obs) = {
                let entry = &self.histories[seq].entries[index];
                let action_index = entry
                    .action
                    .as_ref()
                    .map(|a| a.index())
                    .ok_or_else(|| {
                        PlannerError::invariant("interior history entry carries no action")
                    })?;
                let obs = entry.observation.clone().ok_or_else(|| {
                    PlannerError::invariant("interior history entry carries no observation")
                })?;
                (entry.node, action_index, obs)
            };
            let child = self.create_or_get_child(node, action_index, &obs);
            self.reassign_entry_node(
                EntryRef {
                    seq,
                    index: index + 1,
                },
                child,
            );
        }
        self.histories[seq].invalid_links_start = None;
        Ok(())
    }
}

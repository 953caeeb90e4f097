use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::mappings::observation::ObservationMapping;
use crate::types::NodeId;

/// Per-action statistics inside one belief node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionEntry<O> {
    pub visits: i64,
    pub total_q: f64,
    pub legal: bool,
    pub child: Option<ObservationMapping<O>>,
}

impl<O> ActionEntry<O> {
    fn new(legal: bool) -> Self {
        ActionEntry {
            visits: 0,
            total_q: 0.0,
            legal,
            child: None,
        }
    }

    pub fn mean_q(&self) -> Option<f64> {
        if self.visits > 0 {
            Some(self.total_q / self.visits as f64)
        } else {
            None
        }
    }
}

/// Per-node action bookkeeping over an enumerated action space.
///
/// Construction enumerates the full action set in canonical order; untried
/// actions are consumed front-to-back by the rollout path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionMapping<O> {
    entries: Vec<ActionEntry<O>>,
    untried: VecDeque<usize>,
}

impl<O> ActionMapping<O> {
    pub fn new(action_count: usize) -> Self {
        ActionMapping::with_legality(vec![true; action_count])
    }

    pub fn with_legality(legal: Vec<bool>) -> Self {
        let untried = (0..legal.len()).collect();
        let entries = legal.into_iter().map(ActionEntry::new).collect();
        ActionMapping { entries, untried }
    }

    pub fn action_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, action: usize) -> &ActionEntry<O> {
        &self.entries[action]
    }

    pub fn is_legal(&self, action: usize) -> bool {
        self.entries[action].legal
    }

    /// Flip the legality bit. Re-legalizing a never-visited action puts it
    /// back on the untried queue.
    pub fn set_legal(&mut self, action: usize, legal: bool) {
        let entry = &mut self.entries[action];
        let was_legal = entry.legal;
        entry.legal = legal;
        if legal && !was_legal && entry.visits == 0 && !self.untried.contains(&action) {
            self.untried.push_back(action);
        }
    }

    pub fn has_action_to_try(&self) -> bool {
        self.untried.iter().any(|&i| self.entries[i].legal)
    }

    /// Pop the next untried legal action in canonical order.
    pub fn next_action_to_try(&mut self) -> Option<usize> {
        while let Some(action) = self.untried.pop_front() {
            if self.entries[action].legal {
                return Some(action);
            }
        }
        None
    }

    /// Accumulate a Q delta and a visit delta for one action.
    pub fn update_q(&mut self, action: usize, delta_q: f64, delta_visits: i64) {
        let entry = &mut self.entries[action];
        entry.total_q += delta_q;
        entry.visits += delta_visits;
    }

    /// Total visits over legal actions.
    pub fn total_visits(&self) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.legal)
            .map(|e| e.visits)
            .sum()
    }

    /// The legal action maximizing `meanQ + c·sqrt(ln N / n_a)`, ties broken
    /// by canonical order. A legal action that somehow has no visits is
    /// preferred outright.
    pub fn ucb_action(&self, explore_coefficient: f64) -> Option<usize> {
        let total = self.total_visits();
        if total <= 0 {
            return self
                .entries
                .iter()
                .position(|e| e.legal);
        }
        let ln_total = (total as f64).ln();
        let mut best: Option<(usize, f64)> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.legal {
                continue;
            }
            let Some(mean) = entry.mean_q() else {
                return Some(i);
            };
            let value = mean + explore_coefficient * (ln_total / entry.visits as f64).sqrt();
            match best {
                Some((_, bv)) if bv >= value => {}
                _ => best = Some((i, value)),
            }
        }
        best.map(|(i, _)| i)
    }

    /// The legal action maximizing mean Q, ties broken by higher visit
    /// count, then canonical order.
    pub fn recommended_action(&self) -> Option<usize> {
        let mut best: Option<(usize, f64, i64)> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.legal {
                continue;
            }
            let Some(mean) = entry.mean_q() else {
                continue;
            };
            let better = match best {
                None => true,
                Some((_, bm, bv)) => mean > bm || (mean == bm && entry.visits > bv),
            };
            if better {
                best = Some((i, mean, entry.visits));
            }
        }
        best.map(|(i, _, _)| i)
    }

    /// Highest mean Q over visited legal actions, or `default` if none.
    pub fn best_mean_q(&self, default: f64) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.legal)
            .filter_map(|e| e.mean_q())
            .fold(default, f64::max)
    }

    pub fn child(&self, action: usize) -> Option<&ObservationMapping<O>> {
        self.entries[action].child.as_ref()
    }

    pub fn child_mut(&mut self, action: usize) -> Option<&mut ObservationMapping<O>> {
        self.entries[action].child.as_mut()
    }

    /// The observation mapping under `action`, created on first use.
    pub fn ensure_child(&mut self, action: usize, max_distance: f64) -> &mut ObservationMapping<O> {
        self.entries[action]
            .child
            .get_or_insert_with(|| ObservationMapping::new(max_distance))
    }
}

/// Registry of the belief nodes whose action mappings were created under a
/// model-supplied equivalence key (a grid position, typically).
///
/// When the model declares a legality change for a key, the change engine
/// walks `nodes_for(key)` and flips the bit on every mapping whose owning
/// node is in the affected set; nodes outside it keep their old legality,
/// and newly created mappings pick up the new legality from the model.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LegalActionsPool<K: Ord> {
    by_key: BTreeMap<K, Vec<NodeId>>,
}

impl<K: Ord + Clone> LegalActionsPool<K> {
    pub fn new() -> Self {
        LegalActionsPool {
            by_key: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, key: K, node: NodeId) {
        self.by_key.entry(key).or_default().push(node);
    }

    pub fn nodes_for(&self, key: &K) -> &[NodeId] {
        self.by_key.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

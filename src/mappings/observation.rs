use serde::{Deserialize, Serialize};

use crate::types::{NodeId, Observation};

/// Maps observations received after one action to child belief nodes.
///
/// Continuous observations use approximate matching: the nearest existing
/// edge within `max_distance` is reused, otherwise a new child is created.
/// With the default discrete distance this degenerates to exact matching.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObservationMapping<O> {
    max_distance: f64,
    children: Vec<(O, NodeId)>,
}

impl<O> ObservationMapping<O> {
    pub fn new(max_distance: f64) -> Self {
        ObservationMapping {
            max_distance,
            children: Vec::new(),
        }
    }

    /// Record a new edge. The caller has already checked `get_child`.
    pub fn insert(&mut self, obs: O, node: NodeId) {
        self.children.push((obs, node));
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> impl Iterator<Item = (&O, NodeId)> {
        self.children.iter().map(|(o, n)| (o, *n))
    }
}

impl<O: Observation> ObservationMapping<O> {
    /// The child reached by the nearest matching observation, if any edge
    /// lies within the matching threshold.
    pub fn get_child(&self, obs: &O) -> Option<NodeId> {
        let mut best: Option<(f64, NodeId)> = None;
        for (existing, node) in &self.children {
            let d = obs.distance_to(existing);
            if d <= self.max_distance {
                match best {
                    Some((bd, _)) if bd <= d => {}
                    _ => best = Some((d, *node)),
                }
            }
        }
        best.map(|(_, node)| node)
    }
}

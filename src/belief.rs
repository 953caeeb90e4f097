//! # Belief Tree
//!
//! The search tree over beliefs. A belief node corresponds to a reachable
//! belief after a specific history of (action, observation) pairs and is
//! represented empirically: its particles are the history entries that
//! registered it. Children are created lazily through the node's action and
//! observation mappings.
//!
//! Timestamps on the nodes come from a monotonic event counter rather than
//! wall-clock, so nearest-neighbour caching behaves identically across runs
//! with the same seed.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::history::EntryRef;
use crate::mappings::ActionMapping;
use crate::types::{NodeId, Observation};

/// A vertex of the belief tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeliefNode<O, K> {
    pub action_map: ActionMapping<O>,
    particles: Vec<EntryRef>,
    /// Equivalence key for the legal-actions pool, when the model uses one.
    pub legality_key: Option<K>,
    /// Cached nearest-neighbour node from the last scan.
    pub nn_cache: Option<NodeId>,
    /// Tick of the last nearest-neighbour comparison (-1 = never).
    pub t_nn_comp: i64,
    /// Tick of the last particle addition.
    pub t_last_added_particle: i64,
}

impl<O, K> BeliefNode<O, K> {
    fn new(action_map: ActionMapping<O>, legality_key: Option<K>) -> Self {
        BeliefNode {
            action_map,
            particles: Vec::new(),
            legality_key,
            nn_cache: None,
            t_nn_comp: -1,
            t_last_added_particle: 0,
        }
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn particles(&self) -> &[EntryRef] {
        &self.particles
    }

    /// One particle uniformly at random.
    pub fn sample_particle<R: Rng>(&self, rng: &mut R) -> Option<EntryRef> {
        if self.particles.is_empty() {
            return None;
        }
        let i = rng.gen_range(0..self.particles.len());
        Some(self.particles[i])
    }
}

/// Owns every belief node; ids are insertion order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeliefTree<O, K> {
    nodes: Vec<BeliefNode<O, K>>,
    tick: i64,
}

impl<O: Observation, K> BeliefTree<O, K> {
    /// A tree containing only the root.
    pub fn new(root_map: ActionMapping<O>, root_key: Option<K>) -> Self {
        BeliefTree {
            nodes: vec![BeliefNode::new(root_map, root_key)],
            tick: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &BeliefNode<O, K> {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut BeliefNode<O, K> {
        &mut self.nodes[id]
    }

    /// Node ids in insertion order, for nearest-neighbour scans.
    pub fn all_nodes(&self) -> impl Iterator<Item = NodeId> {
        0..self.nodes.len()
    }

    /// The existing child under (action, observation), if the observation
    /// matches an existing edge.
    pub fn get_child(&self, parent: NodeId, action: usize, obs: &O) -> Option<NodeId> {
        self.nodes[parent]
            .action_map
            .child(action)?
            .get_child(obs)
    }

    /// Insert a new child node under (action, observation).
    pub fn add_child(
        &mut self,
        parent: NodeId,
        action: usize,
        obs: O,
        action_map: ActionMapping<O>,
        legality_key: Option<K>,
        max_observation_distance: f64,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(BeliefNode::new(action_map, legality_key));
        self.nodes[parent]
            .action_map
            .ensure_child(action, max_observation_distance)
            .insert(obs, id);
        id
    }

    fn next_tick(&mut self) -> i64 {
        self.tick += 1;
        self.tick
    }

    /// Register a particle with a node, stamping the freshness tick.
    pub fn add_particle(&mut self, node: NodeId, entry: EntryRef) {
        let tick = self.next_tick();
        let node = &mut self.nodes[node];
        node.particles.push(entry);
        node.t_last_added_particle = tick;
    }

    pub fn remove_particle(&mut self, node: NodeId, entry: EntryRef) {
        let node = &mut self.nodes[node];
        if let Some(pos) = node.particles.iter().position(|&p| p == entry) {
            node.particles.swap_remove(pos);
        }
    }

    /// Stamp a nearest-neighbour comparison on a node.
    pub fn stamp_nn_comparison(&mut self, node: NodeId, nn: Option<NodeId>) {
        let tick = self.next_tick();
        let node = &mut self.nodes[node];
        node.t_nn_comp = tick;
        node.nn_cache = nn;
    }

    pub(crate) fn tick(&self) -> i64 {
        self.tick
    }

    pub(crate) fn nodes(&self) -> &[BeliefNode<O, K>] {
        &self.nodes
    }

    pub(crate) fn from_parts(nodes: Vec<BeliefNode<O, K>>, tick: i64) -> Self {
        BeliefTree { nodes, tick }
    }
}

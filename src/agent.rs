//! Agent façade over the solver.
//!
//! Holds the current belief pointer and exposes the two operations an
//! executing controller needs: recommend an action for the current belief,
//! and advance the belief after an (action, observation) pair.

use crate::model::Model;
use crate::solver::Solver;
use crate::types::{Action, NodeId};

/// An executing agent tracking its current belief in the solver's tree.
pub struct Agent<M: Model> {
    solver: Solver<M>,
    current: NodeId,
}

impl<M: Model> Agent<M> {
    pub fn new(solver: Solver<M>) -> Self {
        let current = solver.root();
        Agent { solver, current }
    }

    pub fn solver(&self) -> &Solver<M> {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut Solver<M> {
        &mut self.solver
    }

    pub fn current_belief(&self) -> NodeId {
        self.current
    }

    /// The best known action for the current belief, by mean Q.
    pub fn recommended_action(&self) -> Option<M::Action> {
        self.solver.recommended_action(self.current)
    }

    /// Step the belief along the (action, observation) edge, creating the
    /// child node if it does not exist yet.
    pub fn update_belief(&mut self, action: &M::Action, obs: &M::Observation) -> NodeId {
        self.current = self
            .solver
            .create_or_get_child(self.current, action.index(), obs);
        self.current
    }

    pub fn into_solver(self) -> Solver<M> {
        self.solver
    }
}

//! Capability traits for the opaque values the planner manipulates.
//!
//! The core never inspects the internals of a state, action, or observation.
//! States must support equality, hashing, an independent per-component
//! distance, and a projection to a numeric vector for spatial indexing.
//! Actions in an enumerated space carry a stable integer code. Observations
//! need a distance only when the space is continuous; the default treats
//! unequal observations as infinitely far apart.

use std::fmt::Debug;
use std::hash::Hash;

use ndarray::Array1;
use serde::{de::DeserializeOwned, Serialize};

/// Stable id of a canonical state record in the state pool.
pub type StateId = usize;

/// Stable id of a belief node in the belief tree.
pub type NodeId = usize;

/// Stable id of a history sequence.
pub type SeqId = usize;

/// Trait for state values supplied by the model.
pub trait State:
    Clone + Debug + Hash + Eq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Project the state to a fixed-arity numeric vector for spatial indexing.
    fn as_vector(&self) -> Array1<f64>;

    /// Component-independent L1 distance to another state.
    fn distance_to(&self, other: &Self) -> f64 {
        let a = self.as_vector();
        let b = other.as_vector();
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
    }
}

/// Trait for actions in an enumerated action space.
pub trait Action:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Integer code of this action in the model's canonical ordering.
    fn index(&self) -> usize;
}

/// Trait for observation values supplied by the model.
pub trait Observation:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Distance to another observation, used for approximate matching of
    /// continuous observations against existing belief-tree edges.
    fn distance_to(&self, other: &Self) -> f64 {
        if self == other {
            0.0
        } else {
            f64::INFINITY
        }
    }
}

/// The result of stepping the model forward from a state with an action.
#[derive(Clone, Debug)]
pub struct StepResult<S, A, O, T> {
    pub action: A,
    /// Opaque transition parameters, carried for later repair.
    pub transition: Option<T>,
    pub observation: O,
    pub reward: f64,
    pub next_state: S,
    pub is_terminal: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde::Deserialize;

    #[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
    struct GridState(i64, i64);

    impl State for GridState {
        fn as_vector(&self) -> Array1<f64> {
            array![self.0 as f64, self.1 as f64]
        }
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct CellObs(i64);

    impl Observation for CellObs {}

    #[test]
    fn test_default_state_distance_is_l1() {
        let a = GridState(0, 0);
        let b = GridState(3, -4);
        assert_eq!(a.distance_to(&b), 7.0);
    }

    #[test]
    fn test_default_observation_distance() {
        let a = CellObs(1);
        let b = CellObs(2);
        assert_eq!(a.distance_to(&a), 0.0);
        assert!(a.distance_to(&b).is_infinite());
    }
}

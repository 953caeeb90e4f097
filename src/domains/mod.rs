//! # Benchmark Domains
//!
//! Concrete POMDP models used by the `simulate` binary and the test suite.
//! Each domain lives behind the [`crate::model::Model`] contract; the
//! planner core never sees their internals.
//!
//! - [`tag`] - pursue a fleeing opponent on a grid map
//! - [`nav`] - navigate to a goal while obstacles appear mid-episode
//! - [`rocks`] - rock sampling with position-dependent action legality

pub mod nav;
pub mod rocks;
pub mod tag;

use serde::{Deserialize, Serialize};

/// A cell on a rectangular grid, row-major.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GridPos {
    pub i: i64,
    pub j: i64,
}

impl GridPos {
    pub fn new(i: i64, j: i64) -> Self {
        GridPos { i, j }
    }

    pub fn manhattan_distance(&self, other: &GridPos) -> i64 {
        (self.i - other.i).abs() + (self.j - other.j).abs()
    }
}

/// A closed rectangle of grid cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRect {
    pub i0: i64,
    pub j0: i64,
    pub i1: i64,
    pub j1: i64,
}

impl GridRect {
    pub fn new(i0: i64, j0: i64, i1: i64, j1: i64) -> Self {
        GridRect { i0, j0, i1, j1 }
    }

    pub fn contains(&self, pos: GridPos) -> bool {
        pos.i >= self.i0 && pos.i <= self.i1 && pos.j >= self.j0 && pos.j <= self.j1
    }

    pub fn cells(&self) -> impl Iterator<Item = GridPos> + '_ {
        (self.i0..=self.i1).flat_map(move |i| (self.j0..=self.j1).map(move |j| GridPos { i, j }))
    }
}

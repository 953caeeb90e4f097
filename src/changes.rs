//! Change flags for model mutation tracking.
//!
//! When the model's geometry mutates, every state the mutation touches is
//! tagged with the union of the relevant flags. The flags then propagate
//! from states to the history entries that reference them, and from there
//! to whole history sequences, driving the repair pass.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Bitset describing how a model change affects a state or history entry.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeFlags(u8);

impl ChangeFlags {
    pub const UNCHANGED: ChangeFlags = ChangeFlags(0);
    /// The reward function changed for this state.
    pub const REWARD: ChangeFlags = ChangeFlags(1 << 0);
    /// The transition out of this state changed.
    pub const TRANSITION: ChangeFlags = ChangeFlags(1 << 1);
    /// The observation generated after reaching this state changed.
    pub const OBSERVATION: ChangeFlags = ChangeFlags(1 << 2);
    /// The observation generated on the way *into* this state changed;
    /// the predecessor entry needs an OBSERVATION repair.
    pub const OBSERVATION_BEFORE: ChangeFlags = ChangeFlags(1 << 3);
    /// The state became newly reachable.
    pub const ADD_STATE: ChangeFlags = ChangeFlags(1 << 4);
    /// The state left the reachable set.
    pub const DEL_STATE: ChangeFlags = ChangeFlags(1 << 5);
    /// The state no longer exists; trajectories through it are invalid.
    pub const DELETED: ChangeFlags = ChangeFlags(1 << 6);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ChangeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ChangeFlags) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl BitOr for ChangeFlags {
    type Output = ChangeFlags;

    fn bitor(self, rhs: ChangeFlags) -> ChangeFlags {
        ChangeFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangeFlags {
    fn bitor_assign(&mut self, rhs: ChangeFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ChangeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "UNCHANGED");
        }
        let names = [
            (ChangeFlags::REWARD, "REWARD"),
            (ChangeFlags::TRANSITION, "TRANSITION"),
            (ChangeFlags::OBSERVATION, "OBSERVATION"),
            (ChangeFlags::OBSERVATION_BEFORE, "OBSERVATION_BEFORE"),
            (ChangeFlags::ADD_STATE, "ADD_STATE"),
            (ChangeFlags::DEL_STATE, "DEL_STATE"),
            (ChangeFlags::DELETED, "DELETED"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_and_contains() {
        let mut flags = ChangeFlags::UNCHANGED;
        assert!(flags.is_empty());

        flags.insert(ChangeFlags::DELETED);
        flags |= ChangeFlags::DEL_STATE;

        assert!(flags.contains(ChangeFlags::DELETED));
        assert!(flags.contains(ChangeFlags::DEL_STATE));
        assert!(!flags.contains(ChangeFlags::REWARD));
        assert!(flags.contains(ChangeFlags::DELETED | ChangeFlags::DEL_STATE));
    }

    #[test]
    fn test_clear() {
        let mut flags = ChangeFlags::REWARD | ChangeFlags::TRANSITION;
        assert!(!flags.is_empty());
        flags.clear();
        assert!(flags.is_empty());
    }

    #[test]
    fn test_debug_names() {
        let flags = ChangeFlags::OBSERVATION | ChangeFlags::DELETED;
        let text = format!("{:?}", flags);
        assert!(text.contains("OBSERVATION"));
        assert!(text.contains("DELETED"));
    }
}

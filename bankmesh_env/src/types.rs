//! Common types shared by every BankMesh layer.

use serde::{Deserialize, Serialize};

/// Logical time value carried in frame headers and history records.
pub type Timestamp = u32;

/// Account balance (and transfer amount) in whole units.
pub type Balance = i64;

/// Upper bound on the number of actors in one run (coordinator included).
pub const MAX_ACTORS: usize = 16;

/// Identifier of one actor in the mesh.
///
/// IDs are dense: a run with N actors uses `0..N`, and ID 0 is always
/// the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u32);

impl ActorId {
    /// The distinguished coordinator.
    pub const COORDINATOR: ActorId = ActorId(0);

    /// Creates an ActorId from a matrix index.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the ID as a matrix index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Returns true for the coordinator.
    pub fn is_coordinator(&self) -> bool {
        *self == Self::COORDINATOR
    }

    /// Iterates over every ID of an `n`-actor run in ascending order.
    pub fn all(n: usize) -> impl Iterator<Item = ActorId> {
        (0..n).map(ActorId::from_index)
    }

    /// Iterates over every peer of `self` in an `n`-actor run, ascending.
    pub fn peers(self, n: usize) -> impl Iterator<Item = ActorId> {
        Self::all(n).filter(move |id| *id != self)
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ActorId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

//! Protocol configuration shared by every actor of a run.

use std::time::Duration;

/// Who exchanges DONE during the termination barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminationMode {
    /// Every actor broadcasts DONE and waits for DONE from all peers.
    #[default]
    FullMesh,

    /// Peers send DONE to the coordinator only and wait for the
    /// coordinator's DONE only; the coordinator waits for everyone.
    CoordinatorCentric,
}

impl std::fmt::Display for TerminationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationMode::FullMesh => write!(f, "full-mesh"),
            TerminationMode::CoordinatorCentric => write!(f, "coordinator"),
        }
    }
}

impl std::str::FromStr for TerminationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full-mesh" | "full_mesh" | "mesh" => Ok(TerminationMode::FullMesh),
            "coordinator" | "coordinator-centric" | "star" => Ok(TerminationMode::CoordinatorCentric),
            _ => Err(format!("Unknown termination mode: {}", s)),
        }
    }
}

/// Configuration for every actor of a run.
#[derive(Debug, Clone, Default)]
pub struct ProtocolConfig {
    /// Termination barrier topology (default: full mesh)
    pub termination: TerminationMode,

    /// Give up on a barrier after this long (default: wait forever)
    pub barrier_timeout: Option<Duration>,

    /// Give up on a transfer acknowledgement after this long (default: wait forever)
    pub ack_timeout: Option<Duration>,
}

impl ProtocolConfig {
    /// Sets the termination topology.
    pub fn with_termination(mut self, mode: TerminationMode) -> Self {
        self.termination = mode;
        self
    }

    /// Bounds every barrier wait.
    pub fn with_barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = Some(timeout);
        self
    }

    /// Bounds every acknowledgement wait.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }
}

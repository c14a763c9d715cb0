//! Startup and termination barriers.
//!
//! ```text
//! INIT --broadcast STARTED--> AWAITING_PEERS_STARTED --all STARTED--> RUNNING
//! RUNNING --stop--> send DONE --> AWAITING_PEERS_DONE --all DONE--> TERMINATED
//! ```
//!
//! STARTED and DONE are counted the moment they arrive, whatever the
//! phase, so a DONE overtaking a slow actor's RUNNING phase is never lost.
//! Anything else that shows up during a barrier wait is parked in the
//! actor's backlog and handled once the actor can act on it.

use bankmesh_env::ActorId;
use std::collections::BTreeSet;
use tracing::info;

use crate::actor::ActorContext;
use crate::config::TerminationMode;
use crate::error::ProtocolError;
use crate::message::MessageType;

/// Lifecycle state of one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    AwaitingPeersStarted,
    Running,
    AwaitingPeersDone,
    Terminated,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Init => "initializing",
            Phase::AwaitingPeersStarted => "awaiting STARTED",
            Phase::Running => "running",
            Phase::AwaitingPeersDone => "awaiting DONE",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Distinct peers a barrier message has been seen from.
#[derive(Debug, Clone, Default)]
pub struct PeerSet {
    seen: BTreeSet<ActorId>,
}

impl PeerSet {
    /// Records `peer`; false if it was already recorded.
    pub fn insert(&mut self, peer: ActorId) -> bool {
        self.seen.insert(peer)
    }

    /// True if every peer in `expected` has been recorded.
    pub fn contains_all(&self, expected: &[ActorId]) -> bool {
        expected.iter().all(|p| self.seen.contains(p))
    }

    /// How many of `expected` have been recorded.
    pub fn count_of(&self, expected: &[ActorId]) -> usize {
        expected.iter().filter(|p| self.seen.contains(p)).count()
    }

    /// Recorded peers, ascending.
    pub fn to_vec(&self) -> Vec<ActorId> {
        self.seen.iter().copied().collect()
    }

    /// Number of recorded peers.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl ActorContext {
    /// Peers this actor must hear DONE from before terminating.
    pub fn done_peers(&self) -> Vec<ActorId> {
        match self.config.termination {
            TerminationMode::CoordinatorCentric if !self.id().is_coordinator() => {
                vec![ActorId::COORDINATOR]
            }
            _ => self.peers(),
        }
    }

    /// True if a DONE from `from` is legal under the termination topology.
    pub(crate) fn expects_done_from(&self, from: ActorId) -> bool {
        self.done_peers().contains(&from)
    }

    /// INIT -> AWAITING_PEERS_STARTED -> RUNNING.
    pub async fn startup_barrier(&mut self) -> Result<(), ProtocolError> {
        let text = format!(
            "{}: process {} has STARTED with balance ${}",
            self.clock.now(),
            self.id(),
            self.balance()
        );
        info!(actor = %self.id(), time = self.clock.now(), balance = self.balance(), "{}", text);

        self.phase = Phase::AwaitingPeersStarted;
        self.broadcast(MessageType::Started, text.into_bytes()).await?;

        let expected = self.peers();
        self.await_barrier(MessageType::Started, &expected).await?;

        info!(actor = %self.id(), time = self.clock.now(), "{}: process {} received all STARTED messages", self.clock.now(), self.id());
        self.phase = Phase::Running;
        Ok(())
    }

    /// RUNNING -> AWAITING_PEERS_DONE -> TERMINATED.
    pub async fn termination_barrier(&mut self) -> Result<(), ProtocolError> {
        let text = format!(
            "{}: process {} has DONE with balance ${}",
            self.clock.now(),
            self.id(),
            self.balance()
        );
        info!(actor = %self.id(), time = self.clock.now(), balance = self.balance(), "{}", text);

        self.phase = Phase::AwaitingPeersDone;
        let payload = text.into_bytes();
        match self.config.termination {
            TerminationMode::CoordinatorCentric if !self.id().is_coordinator() => {
                self.send(ActorId::COORDINATOR, MessageType::Done, payload).await?;
            }
            _ => self.broadcast(MessageType::Done, payload).await?,
        }

        let expected = self.done_peers();
        self.await_barrier(MessageType::Done, &expected).await?;

        info!(actor = %self.id(), time = self.clock.now(), "{}: process {} received all DONE messages", self.clock.now(), self.id());
        self.phase = Phase::Terminated;
        Ok(())
    }

    /// Receives until `kind` has been seen from every peer in `expected`.
    async fn await_barrier(&mut self, kind: MessageType, expected: &[ActorId]) -> Result<(), ProtocolError> {
        let Some(limit) = self.config.barrier_timeout else {
            return self.collect_barrier(kind, expected).await;
        };
        match tokio::time::timeout(limit, self.collect_barrier(kind, expected)).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::BarrierTimeout {
                phase: self.phase,
                seen: self.barrier_set(kind).count_of(expected),
                expected: expected.len(),
                after: limit,
            }),
        }
    }

    async fn collect_barrier(&mut self, kind: MessageType, expected: &[ActorId]) -> Result<(), ProtocolError> {
        while !self.barrier_set(kind).contains_all(expected) {
            if let Some(deferred) = self.poll_peers().await? {
                self.backlog.push_back(deferred);
            }
        }
        Ok(())
    }

    fn barrier_set(&self, kind: MessageType) -> &PeerSet {
        match kind {
            MessageType::Started => &self.started,
            _ => &self.done,
        }
    }
}

//! SimWorld - builds the mesh, hosts every actor and checks the result.
//!
//! Peers run as tokio tasks; the coordinator runs on the caller's task
//! and drives the schedule. The first failure anywhere ends the run and
//! aborts every task still alive.

use bankmesh_core::{
    ActorOutcome, ChannelMatrix, Coordinator, CoordinatorOutcome, PeerActor, ProtocolConfig, ProtocolError,
    SetupError, TransferError, MIN_ACTORS,
};
use bankmesh_env::{
    ActorId, Balance, ChannelFactory, MemoryChannelFactory, DEFAULT_CAPACITY, MAX_ACTORS,
};
use futures::future::select_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::report::{ActorSummary, RunReport};
use crate::scenarios::TransferSchedule;

/// Platform channel primitive for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Bounded in-process queues
    #[default]
    Memory,

    /// Connected Unix socket pairs
    Unix,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Memory => write!(f, "memory"),
            Backend::Unix => write!(f, "unix"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" | "inproc" => Ok(Backend::Memory),
            "unix" | "socket" => Ok(Backend::Unix),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Initial balance of every actor, indexed by ID (coordinator first)
    pub balances: Vec<Balance>,

    /// Channel backend (default: memory)
    pub backend: Backend,

    /// Frames buffered per in-process channel before a send blocks
    pub capacity: usize,

    /// Protocol configuration shared by every actor
    pub protocol: ProtocolConfig,

    /// Seed for randomized schedules
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            balances: vec![0, 10, 10, 10],
            backend: Backend::Memory,
            capacity: DEFAULT_CAPACITY,
            protocol: ProtocolConfig::default(),
            seed: 42,
        }
    }
}

impl SimConfig {
    /// Sets every actor's initial balance, coordinator first.
    pub fn with_balances(mut self, balances: Vec<Balance>) -> Self {
        self.balances = balances;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of actors, the coordinator included.
    pub fn actor_count(&self) -> usize {
        self.balances.len()
    }

    /// Sum of all initial balances, `None` if it overflows.
    pub fn total_balance(&self) -> Option<Balance> {
        self.balances.iter().try_fold(0 as Balance, |total, &b| total.checked_add(b))
    }

    /// Rejects shapes no run can start with.
    pub fn validate(&self) -> Result<(), SetupError> {
        let n = self.actor_count();
        if !(MIN_ACTORS..=MAX_ACTORS).contains(&n) {
            return Err(SetupError::InvalidActorCount {
                count: n,
                min: MIN_ACTORS,
                max: MAX_ACTORS,
            });
        }
        if let Some((i, &balance)) = self.balances.iter().enumerate().find(|(_, b)| **b < 0) {
            return Err(SetupError::NegativeBalance {
                actor: ActorId::from_index(i),
                balance,
            });
        }
        if self.total_balance().is_none() {
            return Err(SetupError::TotalBalanceOverflow { max: Balance::MAX });
        }
        Ok(())
    }

    fn factory(&self) -> Box<dyn ChannelFactory> {
        match self.backend {
            Backend::Memory => Box::new(MemoryChannelFactory::new(self.capacity)),
            #[cfg(unix)]
            Backend::Unix => Box::new(bankmesh_env::UnixChannelFactory::new()),
            #[cfg(not(unix))]
            Backend::Unix => Box::new(MemoryChannelFactory::new(self.capacity)),
        }
    }
}

/// Why a run did not complete.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("Coordinator failed: {0}")]
    Coordinator(#[from] TransferError),

    #[error("Actor {actor} failed: {source}")]
    ActorFailed {
        actor: ActorId,
        #[source]
        source: ProtocolError,
    },

    #[error("Actor {actor} panicked: {reason}")]
    ActorPanicked { actor: ActorId, reason: String },

    #[error("Histories missing for actors {missing:?}")]
    IncompleteHistories { missing: Vec<ActorId> },

    #[error("History reported by actor {actor} differs from its own log")]
    HistoryDiverged { actor: ActorId },

    #[error("Collected balances sum past {max}")]
    CollectedBalanceOverflow { max: Balance },

    #[error("Money not conserved: {before} before, {after} after")]
    ConservationViolated { before: Balance, after: Balance },
}

type PeerHandle = JoinHandle<Result<ActorOutcome, ProtocolError>>;

/// The SimWorld - container for one complete run.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,
}

impl SimWorld {
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }

    /// Runs every actor to completion under `schedule`, over the
    /// configured backend.
    pub async fn run(&self, schedule: &mut dyn TransferSchedule) -> Result<RunReport, RunError> {
        let factory = self.config.factory();
        self.run_with(factory.as_ref(), schedule).await
    }

    /// Same as [`SimWorld::run`], over channels opened by `factory`.
    pub async fn run_with(
        &self,
        factory: &dyn ChannelFactory,
        schedule: &mut dyn TransferSchedule,
    ) -> Result<RunReport, RunError> {
        self.config.validate()?;
        let n = self.config.actor_count();

        let matrix = ChannelMatrix::build(n, factory)?;
        matrix.log_layout();
        let mut endpoints = matrix.into_endpoints().into_iter();

        let coordinator_eps = endpoints.next().ok_or(SetupError::InvalidActorCount {
            count: 0,
            min: MIN_ACTORS,
            max: MAX_ACTORS,
        })?;
        let coordinator = Coordinator::new(coordinator_eps, &self.config.balances, self.config.protocol.clone())?;

        let mut peers = Vec::with_capacity(n - 1);
        for (i, eps) in endpoints.enumerate() {
            let id = ActorId::from_index(i + 1);
            peers.push(PeerActor::new(id, eps, self.config.balances[id.index()], self.config.protocol.clone())?);
        }

        let schedule_name = schedule.name().to_string();
        info!(
            actors = n,
            backend = factory.name(),
            termination = %self.config.protocol.termination,
            schedule = %schedule_name,
            "run starting"
        );
        let mut pending: Vec<(ActorId, PeerHandle)> = peers
            .into_iter()
            .enumerate()
            .map(|(i, peer)| (ActorId::from_index(i + 1), tokio::spawn(peer.run())))
            .collect();

        let mut coordinator_run = Box::pin(drive(coordinator, schedule));
        let mut outcomes = Vec::with_capacity(n - 1);
        let coordinator_result = loop {
            if pending.is_empty() {
                break (&mut coordinator_run).await;
            }
            let next = {
                let next_peer = select_all(pending.iter_mut().map(|(_, handle)| handle));
                tokio::select! {
                    result = &mut coordinator_run => Next::Coordinator(result),
                    (joined, index, _) = next_peer => Next::Peer(index, joined),
                }
            };
            match next {
                Next::Coordinator(result) => break result,
                Next::Peer(index, joined) => {
                    let (actor, _) = pending.remove(index);
                    match settle(actor, joined) {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(e) => {
                            abort_all(&pending);
                            return Err(e);
                        }
                    }
                }
            }
        };

        let coordinator_outcome = match coordinator_result {
            Ok(outcome) => outcome,
            Err(e) => {
                abort_all(&pending);
                error!(error = %e, "coordinator failed");
                return Err(e.into());
            }
        };
        for (actor, handle) in pending {
            outcomes.push(settle(actor, handle.await)?);
        }
        outcomes.sort_by_key(|o| o.id);

        self.check(coordinator_outcome, outcomes, &schedule_name, factory.name())
    }

    fn check(
        &self,
        coordinator: CoordinatorOutcome,
        peers: Vec<ActorOutcome>,
        schedule: &str,
        backend: &str,
    ) -> Result<RunReport, RunError> {
        let histories = coordinator.histories;
        if !histories.is_complete() {
            return Err(RunError::IncompleteHistories {
                missing: histories.missing(),
            });
        }
        for peer in &peers {
            if histories.get(peer.id) != Some(&peer.history) {
                return Err(RunError::HistoryDiverged { actor: peer.id });
            }
        }

        let before = self
            .config
            .total_balance()
            .ok_or(SetupError::TotalBalanceOverflow { max: Balance::MAX })?;
        let after = histories
            .total_balance()
            .ok_or(RunError::CollectedBalanceOverflow { max: Balance::MAX })?;
        if before != after {
            return Err(RunError::ConservationViolated { before, after });
        }

        let mut actors = vec![ActorSummary {
            id: ActorId::COORDINATOR,
            initial_balance: self.config.balances[0],
            final_balance: histories.get(ActorId::COORDINATOR).map_or(0, |h| h.balance()),
            final_time: coordinator.final_time,
            stats: Default::default(),
            started_from: coordinator.started_from,
            done_from: coordinator.done_from,
        }];
        actors.extend(peers.iter().map(|p| ActorSummary {
            id: p.id,
            initial_balance: self.config.balances[p.id.index()],
            final_balance: p.history.balance(),
            final_time: p.final_time,
            stats: p.stats,
            started_from: p.started_from.clone(),
            done_from: p.done_from.clone(),
        }));

        info!(
            completed = coordinator.completed.len(),
            rejected = coordinator.rejected.len(),
            total = after,
            "run complete"
        );
        Ok(RunReport {
            schedule: schedule.to_string(),
            backend: backend.to_string(),
            termination: self.config.protocol.termination.to_string(),
            seed: self.config.seed,
            actors,
            completed: coordinator.completed,
            rejected: coordinator.rejected,
            total_before: before,
            total_after: after,
            histories,
        })
    }
}

enum Next {
    Coordinator(Result<CoordinatorOutcome, TransferError>),
    Peer(usize, Result<Result<ActorOutcome, ProtocolError>, tokio::task::JoinError>),
}

/// Start, issue every order the schedule yields, stop.
async fn drive(
    mut coordinator: Coordinator,
    schedule: &mut dyn TransferSchedule,
) -> Result<CoordinatorOutcome, TransferError> {
    coordinator.start().await?;
    while let Some(order) = schedule.next_order(coordinator.ledger()) {
        match coordinator.execute_transfer(order).await {
            Ok(()) => {}
            Err(e) if e.is_rejection() => debug!(%order, "order skipped"),
            Err(e) => return Err(e),
        }
    }
    Ok(coordinator.stop().await?)
}

fn settle(
    actor: ActorId,
    joined: Result<Result<ActorOutcome, ProtocolError>, tokio::task::JoinError>,
) -> Result<ActorOutcome, RunError> {
    match joined {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(source)) => {
            error!(%actor, error = %source, "actor failed");
            Err(RunError::ActorFailed { actor, source })
        }
        Err(e) => Err(RunError::ActorPanicked {
            actor,
            reason: e.to_string(),
        }),
    }
}

fn abort_all(pending: &[(ActorId, PeerHandle)]) {
    for (_, handle) in pending {
        handle.abort();
    }
}

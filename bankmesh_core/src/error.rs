//! Error taxonomy for the BankMesh protocol core.
//!
//! - [`SetupError`]: the mesh cannot be built; fatal before any actor starts
//! - [`TransportError`]: a framing or channel failure on one endpoint
//! - [`ProtocolError`]: anything fatal to the owning actor
//! - [`TransferError`]: outcome of one coordinator-issued transfer

use bankmesh_env::{ActorId, Balance, ChannelError, Timestamp};
use std::time::Duration;
use thiserror::Error;

use crate::message::MessageType;
use crate::sync::Phase;

/// Failure to build the channel matrix or validate a run's shape.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Actor count {count} outside supported range {min}..={max}")]
    InvalidActorCount { count: usize, min: usize, max: usize },

    #[error("Failed to create channel {from} -> {to}: {source}")]
    ChannelCreation {
        from: ActorId,
        to: ActorId,
        #[source]
        source: ChannelError,
    },

    #[error("Actor {id} does not exist in a {n}-actor mesh")]
    UnknownActor { id: ActorId, n: usize },

    #[error("Actor {id} is reserved for the coordinator")]
    ReservedCoordinator { id: ActorId },

    #[error("Endpoints belong to actor {endpoints}, not {requested}")]
    EndpointMismatch { requested: ActorId, endpoints: ActorId },

    #[error("Expected {expected} initial balances, got {got}")]
    BalanceCount { expected: usize, got: usize },

    #[error("Initial balance of actor {actor} is negative: {balance}")]
    NegativeBalance { actor: ActorId, balance: Balance },

    #[error("Initial balances sum past {max}")]
    TotalBalanceOverflow { max: Balance },
}

/// Framing and channel failures on one actor's endpoints.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid destination {dst} for actor {local} in a {n}-actor mesh")]
    InvalidDestination { local: ActorId, dst: ActorId, n: usize },

    #[error("Invalid source {src} for actor {local} in a {n}-actor mesh")]
    InvalidSource { local: ActorId, src: ActorId, n: usize },

    #[error("Channel to/from {peer} is closed")]
    ChannelClosed { peer: ActorId },

    #[error("Short write to {dst}: {written} of {expected} bytes accepted")]
    ShortWrite { dst: ActorId, expected: usize, written: usize },

    #[error("Short read from {src}: expected {expected} bytes, got {got}")]
    ShortRead { src: ActorId, expected: usize, got: usize },

    #[error("Bad magic from {src}: {found:#06x}")]
    BadMagic { src: ActorId, found: u32 },

    #[error("Unknown message type {tag} from {src}")]
    UnknownMessageType { src: ActorId, tag: u32 },

    #[error("Payload of {len} bytes exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Every peer channel of actor {local} is closed")]
    AllPeersClosed { local: ActorId },

    #[error("Channel error with {peer}: {source}")]
    Channel {
        peer: ActorId,
        #[source]
        source: ChannelError,
    },
}

/// Violations fatal to the actor that observes them.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: MessageType, reason: String },

    #[error("Unexpected {kind} from {from} while {phase}")]
    UnexpectedMessage { from: ActorId, kind: MessageType, phase: Phase },

    #[error("Duplicate {kind} from {from}")]
    DuplicateBarrierMessage { from: ActorId, kind: MessageType },

    #[error("Transfer {source_actor} -> {destination} routed through {local} by {from}")]
    MisroutedTransfer {
        local: ActorId,
        from: ActorId,
        source_actor: ActorId,
        destination: ActorId,
    },

    #[error("Barrier timeout while {phase}: {seen} of {expected} peers after {after:?}")]
    BarrierTimeout {
        phase: Phase,
        seen: usize,
        expected: usize,
        after: Duration,
    },

    #[error("Balance history from {from} claims actor {claimed}")]
    HistoryMismatch { from: ActorId, claimed: ActorId },

    #[error("Balance {balance} of actor {actor} cannot absorb a change of {delta}")]
    BalanceOverflow { actor: ActorId, balance: Balance, delta: Balance },
}

/// Outcome of a single coordinator-issued transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Actor {source_actor} cannot cover {amount} (balance {balance})")]
    InsufficientFunds {
        source_actor: ActorId,
        balance: Balance,
        amount: Balance,
    },

    #[error("Invalid transfer order: {0}")]
    InvalidOrder(String),

    #[error("No acknowledgement from {from} within {after:?} (sent at {sent_at})")]
    AckTimeout {
        from: ActorId,
        sent_at: Timestamp,
        after: Duration,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransferError {
    /// True when the order was refused before anything was sent.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::InsufficientFunds { .. } | Self::InvalidOrder(_))
    }
}

impl From<TransportError> for TransferError {
    fn from(e: TransportError) -> Self {
        Self::Protocol(e.into())
    }
}

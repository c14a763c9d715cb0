//! BankMesh Core - Channel-Matrix Messaging and Transfer Protocol
//!
//! This library solves three problems of a fixed group of cooperating actors:
//! 1. **Messaging**: one directed channel per ordered pair, framed messages,
//!    targeted send/receive and a deterministic-order `receive_any`
//! 2. **Synchronization**: STARTED/DONE barriers that never lose a message
//!    arriving "early"
//! 3. **Transfers**: coordinator-driven money movement with acknowledgements,
//!    logged against Lamport time into per-actor balance histories
//!
//! # Usage
//!
//! ```ignore
//! use bankmesh_core::{actor, ChannelMatrix, Coordinator, ProtocolConfig};
//! use bankmesh_env::MemoryChannelFactory;
//!
//! let mut eps = ChannelMatrix::build(3, &MemoryChannelFactory::default())?.into_endpoints();
//! // spawn actor::run(id, eps[id], balance, config) for ids 1..3, then:
//! let mut coordinator = Coordinator::new(eps.remove(0), &[0, 10, 0], ProtocolConfig::default())?;
//! coordinator.start().await?;
//! coordinator.transfer(ActorId(1), ActorId(2), 4).await?;
//! let outcome = coordinator.stop().await?;
//! ```

pub mod actor;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod matrix;
pub mod message;
pub mod sync;
pub mod transport;

// Re-export key types for convenience
pub use actor::{ActorContext, ActorOutcome, PeerActor, TransferStats};
pub use config::{ProtocolConfig, TerminationMode};
pub use coordinator::{run_coordinator, Coordinator, CoordinatorOutcome, RejectedTransfer};
pub use error::{ProtocolError, SetupError, TransferError, TransportError};
pub use history::{AllHistories, BalanceHistory, BalanceRecord};
pub use matrix::{ChannelMatrix, ChannelSlot, MIN_ACTORS};
pub use message::{Message, MessageType, TransferOrder, MAX_HISTORY_RECORDS, MAX_PAYLOAD_LEN};
pub use sync::{PeerSet, Phase};
pub use transport::ActorEndpoints;

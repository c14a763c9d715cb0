//! BankMesh Channel Abstraction Layer
//!
//! This crate isolates the platform channel primitive so the BankMesh
//! protocol runs unchanged over in-process queues or Unix sockets.
//!
//! # Core Concept: Directed Byte Channels
//!
//! Every ordered pair of actors `(i, j)` gets its own channel. The
//! protocol layer sees only two owned halves:
//! - [`ChannelWriter`]: frames go in, the accepted byte count comes out
//! - [`ChannelReader`]: buffered, with a non-committal readiness check
//!
//! Backends implement [`ByteSink`]/[`ByteSource`] and a [`ChannelFactory`].
//!
//! # Example
//!
//! ```ignore
//! use bankmesh_env::{ActorId, ChannelFactory, MemoryChannelFactory};
//!
//! let factory = MemoryChannelFactory::default();
//! let (mut tx, mut rx) = factory.open(ActorId(1), ActorId(2))?;
//! tx.write_frame(b"hello").await?;
//! let bytes = rx.read_exact(5).await?;
//! ```

mod channel;
mod clock;
mod error;
mod memory;
mod types;
#[cfg(unix)]
mod unix;

pub use channel::{ByteSink, ByteSource, ChannelFactory, ChannelReader, ChannelWriter};
pub use clock::LamportClock;
pub use error::ChannelError;
pub use memory::{MemoryChannelFactory, DEFAULT_CAPACITY};
pub use types::{ActorId, Balance, Timestamp, MAX_ACTORS};
#[cfg(unix)]
pub use unix::UnixChannelFactory;

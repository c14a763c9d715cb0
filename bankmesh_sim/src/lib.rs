//! BankMesh Simulation Harness
//!
//! Hosts a complete BankMesh run in one process: builds the channel
//! matrix, spawns one tokio task per peer, drives the coordinator through
//! a transfer schedule and checks the collected histories.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ ChannelMatrix (memory queues or Unix socket pairs)   │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼────────┐          ┌────▼────┐                       │
//! │  │ Coordinator │◄────────►│  Peer   │     ...               │
//! │  │     #0      │ channels │   #1    │                       │
//! │  └─────▲───────┘          └─────────┘                       │
//! │        │                                                    │
//! │  ┌─────┴────────────────────────────┐                       │
//! │  │        TransferSchedule           │                       │
//! │  └───────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use bankmesh_sim::{SimConfig, SimWorld};
//! use bankmesh_sim::scenarios::BankRobbery;
//!
//! let config = SimConfig::default().with_balances(vec![0, 1, 2, 3]);
//! let report = SimWorld::new(config).run(&mut BankRobbery::new(4)).await?;
//! println!("{}", report.history_table());
//! ```

mod report;
mod world;
pub mod scenarios;

pub use report::{ActorSummary, RunReport};
pub use world::{Backend, RunError, SimConfig, SimWorld};

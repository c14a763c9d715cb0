//! The coordinator (actor 0): drives transfers, ends the run and collects
//! every actor's balance history.
//!
//! # Transfer protocol
//!
//! ```text
//! coordinator        source            destination
//!     |--TRANSFER------->|                  |
//!     |                  | debit            |
//!     |                  |--TRANSFER------->|
//!     |                  |                  | credit
//!     |<-------------------------ACK--------|
//! ```
//!
//! The coordinator is an account holder too. When it is the source it
//! debits locally and sends straight to the destination; when it is the
//! destination it waits for the source's forwarded TRANSFER itself and no
//! ACK is exchanged.
//!
//! A mirror ledger of every balance lets the coordinator refuse orders the
//! source cannot cover before anything is sent.

use bankmesh_env::{ActorId, Balance, Timestamp};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::actor::ActorContext;
use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, SetupError, TransferError};
use crate::history::AllHistories;
use crate::message::{Message, MessageType, TransferOrder};
use crate::sync::Phase;
use crate::transport::ActorEndpoints;

/// An order the coordinator refused, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedTransfer {
    pub source: ActorId,
    pub destination: ActorId,
    pub amount: Balance,
    pub reason: String,
}

/// Everything the coordinator knows once the run is over.
#[derive(Debug, Clone)]
pub struct CoordinatorOutcome {
    /// One history per actor, the coordinator's own included
    pub histories: AllHistories,

    /// Orders that went through, in issue order
    pub completed: Vec<TransferOrder>,

    /// Orders refused before anything was sent
    pub rejected: Vec<RejectedTransfer>,

    pub started_from: Vec<ActorId>,
    pub done_from: Vec<ActorId>,

    /// Coordinator clock when the last history arrived
    pub final_time: Timestamp,
}

/// Actor 0.
pub struct Coordinator {
    ctx: ActorContext,
    ledger: Vec<Balance>,
    completed: Vec<TransferOrder>,
    rejected: Vec<RejectedTransfer>,
}

impl Coordinator {
    /// Takes actor 0's endpoints and every actor's initial balance,
    /// indexed by actor ID.
    pub fn new(endpoints: ActorEndpoints, balances: &[Balance], config: ProtocolConfig) -> Result<Self, SetupError> {
        if !endpoints.local_id().is_coordinator() {
            return Err(SetupError::EndpointMismatch {
                requested: ActorId::COORDINATOR,
                endpoints: endpoints.local_id(),
            });
        }
        let n = endpoints.actor_count();
        if balances.len() != n {
            return Err(SetupError::BalanceCount {
                expected: n,
                got: balances.len(),
            });
        }
        if let Some((i, &balance)) = balances.iter().enumerate().find(|(_, b)| **b < 0) {
            return Err(SetupError::NegativeBalance {
                actor: ActorId::from_index(i),
                balance,
            });
        }
        if balances.iter().try_fold(0 as Balance, |total, &b| total.checked_add(b)).is_none() {
            return Err(SetupError::TotalBalanceOverflow { max: Balance::MAX });
        }

        Ok(Self {
            ctx: ActorContext::new(endpoints, balances[0], config),
            ledger: balances.to_vec(),
            completed: Vec::new(),
            rejected: Vec::new(),
        })
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.ctx.phase()
    }

    /// Balances as the coordinator believes them to be.
    pub fn ledger(&self) -> &[Balance] {
        &self.ledger
    }

    /// Startup barrier.
    pub async fn start(&mut self) -> Result<(), ProtocolError> {
        self.ctx.startup_barrier().await
    }

    /// Moves `amount` from `source` to `destination` and waits until the
    /// move is complete.
    pub async fn transfer(&mut self, source: ActorId, destination: ActorId, amount: Balance) -> Result<(), TransferError> {
        self.execute_transfer(TransferOrder::new(source, destination, amount)).await
    }

    /// Executes one order.
    ///
    /// Rejections ([`TransferError::is_rejection`]) are recorded and leave
    /// the run intact; anything else is fatal to the run.
    pub async fn execute_transfer(&mut self, order: TransferOrder) -> Result<(), TransferError> {
        if let Err(rejection) = self.validate(&order) {
            warn!(%order, error = %rejection, "transfer rejected");
            self.rejected.push(RejectedTransfer {
                source: order.source,
                destination: order.destination,
                amount: order.amount,
                reason: rejection.to_string(),
            });
            return Err(rejection);
        }

        if order.source.is_coordinator() {
            self.ctx.debit(order.amount)?;
            info!(
                actor = %ActorId::COORDINATOR,
                time = self.ctx.now(),
                "{}: process 0 transferred ${} to process {}",
                self.ctx.now(),
                order.amount,
                order.destination
            );
            self.ctx.send(order.destination, MessageType::Transfer, order.encode()).await?;
            self.await_reply(order.destination, MessageType::Ack).await?;
        } else if order.destination.is_coordinator() {
            self.ctx.send(order.source, MessageType::Transfer, order.encode()).await?;
            let forwarded = self.await_reply(order.source, MessageType::Transfer).await?;
            if forwarded.transfer_order()? != order {
                return Err(ProtocolError::MisroutedTransfer {
                    local: ActorId::COORDINATOR,
                    from: order.source,
                    source_actor: order.source,
                    destination: order.destination,
                }
                .into());
            }
            self.ctx.credit(order.amount)?;
            info!(
                actor = %ActorId::COORDINATOR,
                time = self.ctx.now(),
                "{}: process 0 received ${} from process {}",
                self.ctx.now(),
                order.amount,
                order.source
            );
        } else {
            self.ctx.send(order.source, MessageType::Transfer, order.encode()).await?;
            self.await_reply(order.destination, MessageType::Ack).await?;
        }

        self.post_to_ledger(&order)?;
        self.completed.push(order);
        debug!(%order, time = self.ctx.now(), "transfer complete");
        Ok(())
    }

    /// Executes every order in turn. Rejected orders are skipped; the first
    /// fatal failure ends the run.
    pub async fn run_schedule<I>(&mut self, orders: I) -> Result<(), TransferError>
    where
        I: IntoIterator<Item = TransferOrder>,
    {
        for order in orders {
            match self.execute_transfer(order).await {
                Ok(()) => {}
                Err(e) if e.is_rejection() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Broadcasts STOP, runs the termination barrier and collects every
    /// peer's history.
    pub async fn stop(mut self) -> Result<CoordinatorOutcome, ProtocolError> {
        if self.ctx.phase() != Phase::Running {
            return Err(ProtocolError::UnexpectedMessage {
                from: ActorId::COORDINATOR,
                kind: MessageType::Stop,
                phase: self.ctx.phase(),
            });
        }
        self.ctx.broadcast(MessageType::Stop, Vec::new()).await?;
        self.ctx.termination_barrier().await?;

        let mut histories = AllHistories::new(self.ctx.actor_count());
        histories.insert(self.ctx.history().clone());
        while !histories.is_complete() {
            let (from, msg) = self.ctx.next_message().await?;
            if msg.kind() != MessageType::BalanceHistory {
                return Err(ProtocolError::UnexpectedMessage {
                    from,
                    kind: msg.kind(),
                    phase: self.ctx.phase(),
                });
            }
            let history = msg.history()?;
            if history.actor() != from {
                return Err(ProtocolError::HistoryMismatch {
                    from,
                    claimed: history.actor(),
                });
            }
            debug!(peer = %from, records = history.len(), "history collected");
            if !histories.insert(history) {
                return Err(ProtocolError::UnexpectedMessage {
                    from,
                    kind: MessageType::BalanceHistory,
                    phase: self.ctx.phase(),
                });
            }
        }
        self.ctx.close();

        info!(
            actors = histories.len(),
            total = ?histories.total_balance(),
            completed = self.completed.len(),
            rejected = self.rejected.len(),
            "all histories collected"
        );
        Ok(CoordinatorOutcome {
            histories,
            completed: self.completed,
            rejected: self.rejected,
            started_from: self.ctx.started_from(),
            done_from: self.ctx.done_from(),
            final_time: self.ctx.now(),
        })
    }

    fn post_to_ledger(&mut self, order: &TransferOrder) -> Result<(), ProtocolError> {
        let (src, dst) = (order.source.index(), order.destination.index());
        let overflow = |actor: ActorId, balance: Balance, delta: Balance| ProtocolError::BalanceOverflow {
            actor,
            balance,
            delta,
        };
        let debited = self.ledger[src]
            .checked_sub(order.amount)
            .ok_or_else(|| overflow(order.source, self.ledger[src], order.amount.saturating_neg()))?;
        let credited = self.ledger[dst]
            .checked_add(order.amount)
            .ok_or_else(|| overflow(order.destination, self.ledger[dst], order.amount))?;
        self.ledger[src] = debited;
        self.ledger[dst] = credited;
        Ok(())
    }

    fn validate(&self, order: &TransferOrder) -> Result<(), TransferError> {
        let n = self.ctx.actor_count();
        if self.ctx.phase() != Phase::Running {
            return Err(TransferError::InvalidOrder(format!(
                "coordinator is {}, not running",
                self.ctx.phase()
            )));
        }
        if order.source.index() >= n || order.destination.index() >= n {
            return Err(TransferError::InvalidOrder(format!("{} names an actor outside 0..{}", order, n)));
        }
        if order.source == order.destination {
            return Err(TransferError::InvalidOrder(format!("{} has the same source and destination", order)));
        }
        if order.amount < 0 {
            return Err(TransferError::InvalidOrder(format!("negative amount {}", order.amount)));
        }
        let balance = self.ledger[order.source.index()];
        if balance < order.amount {
            return Err(TransferError::InsufficientFunds {
                source_actor: order.source,
                balance,
                amount: order.amount,
            });
        }
        Ok(())
    }

    async fn await_reply(&mut self, from: ActorId, kind: MessageType) -> Result<Message, TransferError> {
        let sent_at = self.ctx.now();
        let reply = match self.ctx.config.ack_timeout {
            None => self.ctx.receive_from(from).await?,
            Some(limit) => match tokio::time::timeout(limit, self.ctx.receive_from(from)).await {
                Ok(reply) => reply?,
                Err(_) => return Err(ack_timeout(from, sent_at, limit)),
            },
        };
        if reply.kind() != kind {
            return Err(ProtocolError::UnexpectedMessage {
                from,
                kind: reply.kind(),
                phase: self.ctx.phase(),
            }
            .into());
        }
        Ok(reply)
    }
}

fn ack_timeout(from: ActorId, sent_at: Timestamp, after: Duration) -> TransferError {
    warn!(peer = %from, sent_at, ?after, "acknowledgement timed out");
    TransferError::AckTimeout { from, sent_at, after }
}

/// Runs the coordinator through a whole schedule: start, every order, stop.
pub async fn run_coordinator<I>(
    endpoints: ActorEndpoints,
    balances: &[Balance],
    orders: I,
    config: ProtocolConfig,
) -> Result<CoordinatorOutcome, TransferError>
where
    I: IntoIterator<Item = TransferOrder>,
{
    let mut coordinator = Coordinator::new(endpoints, balances, config).map_err(ProtocolError::from)?;
    coordinator.start().await?;
    coordinator.run_schedule(orders).await?;
    Ok(coordinator.stop().await?)
}

//! Actor state and the peer (non-coordinator) run loop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    ActorContext                      │
//! │  endpoints: N-1 writers + N-1 readers                │
//! │  clock:     Lamport time, ticked on send             │
//! │  history:   balance event log                        │
//! │  started / done: barrier bookkeeping                 │
//! │  backlog:   messages deferred during a barrier wait  │
//! └──────────────────────────────────────────────────────┘
//!              ▲                          ▲
//!        PeerActor::run             Coordinator
//! ```
//!
//! Every actor owns its context exclusively; nothing is shared between
//! actors except the channels themselves.

use bankmesh_env::{ActorId, Balance, LamportClock, Timestamp};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, SetupError};
use crate::history::BalanceHistory;
use crate::message::{Message, MessageType, TransferOrder};
use crate::sync::{Phase, PeerSet};
use crate::transport::ActorEndpoints;

/// Everything one actor owns while it runs.
pub struct ActorContext {
    pub(crate) endpoints: ActorEndpoints,
    pub(crate) clock: LamportClock,
    pub(crate) history: BalanceHistory,
    pub(crate) started: PeerSet,
    pub(crate) done: PeerSet,
    pub(crate) backlog: VecDeque<(ActorId, Message)>,
    pub(crate) phase: Phase,
    pub(crate) config: ProtocolConfig,
}

impl ActorContext {
    /// Wraps restricted endpoints with a fresh clock and history.
    pub fn new(endpoints: ActorEndpoints, initial_balance: Balance, config: ProtocolConfig) -> Self {
        let history = BalanceHistory::new(endpoints.local_id(), initial_balance);
        Self {
            endpoints,
            clock: LamportClock::new(),
            history,
            started: PeerSet::default(),
            done: PeerSet::default(),
            backlog: VecDeque::new(),
            phase: Phase::Init,
            config,
        }
    }

    pub fn id(&self) -> ActorId {
        self.endpoints.local_id()
    }

    pub fn actor_count(&self) -> usize {
        self.endpoints.actor_count()
    }

    /// Every other actor, ascending.
    pub fn peers(&self) -> Vec<ActorId> {
        self.endpoints.peers().collect()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn balance(&self) -> Balance {
        self.history.balance()
    }

    pub fn history(&self) -> &BalanceHistory {
        &self.history
    }

    /// Peers a STARTED has been received from.
    pub fn started_from(&self) -> Vec<ActorId> {
        self.started.to_vec()
    }

    /// Peers a DONE has been received from.
    pub fn done_from(&self) -> Vec<ActorId> {
        self.done.to_vec()
    }

    /// Stamps and sends one frame to `dst`.
    pub async fn send(&mut self, dst: ActorId, kind: MessageType, payload: Vec<u8>) -> Result<(), ProtocolError> {
        let msg = Message::new(kind, payload, self.clock.tick());
        self.endpoints.send(dst, &msg).await?;
        Ok(())
    }

    /// Stamps one frame and sends it to every peer. A multicast is one
    /// clock event, so every copy carries the same time.
    pub async fn broadcast(&mut self, kind: MessageType, payload: Vec<u8>) -> Result<(), ProtocolError> {
        let msg = Message::new(kind, payload, self.clock.tick());
        self.endpoints.broadcast(&msg).await?;
        Ok(())
    }

    /// Sends this actor's history to the coordinator.
    pub(crate) async fn report_history(&mut self) -> Result<(), ProtocolError> {
        let msg = Message::balance_history(&self.history, self.clock.tick());
        self.endpoints.send(ActorId::COORDINATOR, &msg).await?;
        debug!(actor = %self.id(), records = self.history.len(), "history reported");
        Ok(())
    }

    /// Receives one frame from any peer.
    ///
    /// Barrier messages are counted here and swallowed (`Ok(None)`);
    /// everything else is handed back to the caller.
    pub(crate) async fn poll_peers(&mut self) -> Result<Option<(ActorId, Message)>, ProtocolError> {
        let (from, msg) = self.endpoints.receive_any().await?;
        self.admit(from, msg)
    }

    /// Next message to act on: the oldest deferred one, else a fresh one.
    pub(crate) async fn next_message(&mut self) -> Result<(ActorId, Message), ProtocolError> {
        if let Some(deferred) = self.backlog.pop_front() {
            return Ok(deferred);
        }
        loop {
            if let Some(received) = self.poll_peers().await? {
                return Ok(received);
            }
        }
    }

    /// Blocks on the channel from `src` alone until a non-barrier frame arrives.
    pub(crate) async fn receive_from(&mut self, src: ActorId) -> Result<Message, ProtocolError> {
        loop {
            let msg = self.endpoints.receive(src).await?;
            if let Some((_, msg)) = self.admit(src, msg)? {
                return Ok(msg);
            }
        }
    }

    /// Fails on the first message still deferred after the final barrier.
    pub(crate) fn reject_leftovers(&mut self) -> Result<(), ProtocolError> {
        match self.backlog.pop_front() {
            Some((from, msg)) => Err(ProtocolError::UnexpectedMessage {
                from,
                kind: msg.kind(),
                phase: self.phase,
            }),
            None => Ok(()),
        }
    }

    /// Applies a debit at the current logical time.
    pub(crate) fn debit(&mut self, amount: Balance) -> Result<(), ProtocolError> {
        let balance = self.balance().checked_sub(amount).ok_or(ProtocolError::BalanceOverflow {
            actor: self.id(),
            balance: self.balance(),
            delta: amount.saturating_neg(),
        })?;
        self.history.record(balance, self.clock.now());
        Ok(())
    }

    /// Applies a credit at the current logical time.
    pub(crate) fn credit(&mut self, amount: Balance) -> Result<(), ProtocolError> {
        let balance = self.balance().checked_add(amount).ok_or(ProtocolError::BalanceOverflow {
            actor: self.id(),
            balance: self.balance(),
            delta: amount,
        })?;
        self.history.record(balance, self.clock.now());
        Ok(())
    }

    /// Drops every channel half.
    pub(crate) fn close(&mut self) {
        self.endpoints.close();
    }

    fn admit(&mut self, from: ActorId, msg: Message) -> Result<Option<(ActorId, Message)>, ProtocolError> {
        self.clock.observe(msg.local_time());
        let kind = msg.kind();
        match kind {
            MessageType::Started => {
                if !self.started.insert(from) {
                    return Err(ProtocolError::DuplicateBarrierMessage { from, kind });
                }
                debug!(actor = %self.id(), peer = %from, time = self.clock.now(), text = %msg.text_payload(), "STARTED counted");
                Ok(None)
            }
            MessageType::Done => {
                if !self.expects_done_from(from) {
                    return Err(ProtocolError::UnexpectedMessage {
                        from,
                        kind,
                        phase: self.phase,
                    });
                }
                if !self.done.insert(from) {
                    return Err(ProtocolError::DuplicateBarrierMessage { from, kind });
                }
                debug!(actor = %self.id(), peer = %from, time = self.clock.now(), text = %msg.text_payload(), "DONE counted");
                Ok(None)
            }
            _ => Ok(Some((from, msg))),
        }
    }
}

/// Transfer counters of one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    /// Orders debited and forwarded
    pub sent: usize,

    /// Transfers credited and acknowledged
    pub received: usize,

    /// Orders dropped for lack of funds
    pub dropped: usize,
}

/// What a peer reports when it exits cleanly.
#[derive(Debug, Clone)]
pub struct ActorOutcome {
    pub id: ActorId,
    pub history: BalanceHistory,
    pub started_from: Vec<ActorId>,
    pub done_from: Vec<ActorId>,
    pub stats: TransferStats,
    pub final_time: Timestamp,
}

/// A non-coordinator account holder.
pub struct PeerActor {
    ctx: ActorContext,
    stats: TransferStats,
}

impl PeerActor {
    /// Checks that `endpoints` belong to `id` and that `id` is a peer.
    pub fn new(
        id: ActorId,
        endpoints: ActorEndpoints,
        initial_balance: Balance,
        config: ProtocolConfig,
    ) -> Result<Self, SetupError> {
        if endpoints.local_id() != id {
            return Err(SetupError::EndpointMismatch {
                requested: id,
                endpoints: endpoints.local_id(),
            });
        }
        if id.is_coordinator() {
            return Err(SetupError::ReservedCoordinator { id });
        }
        if initial_balance < 0 {
            return Err(SetupError::NegativeBalance {
                actor: id,
                balance: initial_balance,
            });
        }
        Ok(Self {
            ctx: ActorContext::new(endpoints, initial_balance, config),
            stats: TransferStats::default(),
        })
    }

    /// Runs the whole lifecycle: both barriers, the transfer loop and the
    /// final history report to the coordinator.
    pub async fn run(mut self) -> Result<ActorOutcome, ProtocolError> {
        self.ctx.startup_barrier().await?;
        self.serve().await?;
        self.ctx.termination_barrier().await?;
        self.ctx.reject_leftovers()?;

        self.ctx.report_history().await?;

        self.ctx.close();
        Ok(ActorOutcome {
            id: self.ctx.id(),
            history: self.ctx.history.clone(),
            started_from: self.ctx.started_from(),
            done_from: self.ctx.done_from(),
            stats: self.stats,
            final_time: self.ctx.now(),
        })
    }

    /// RUNNING: serve transfers until the coordinator says STOP.
    async fn serve(&mut self) -> Result<(), ProtocolError> {
        loop {
            let (from, msg) = self.ctx.next_message().await?;
            match msg.kind() {
                MessageType::Transfer => self.handle_transfer(from, &msg).await?,
                MessageType::Stop if from.is_coordinator() => {
                    debug!(actor = %self.ctx.id(), time = self.ctx.now(), "STOP received");
                    return Ok(());
                }
                kind => {
                    return Err(ProtocolError::UnexpectedMessage {
                        from,
                        kind,
                        phase: self.ctx.phase,
                    })
                }
            }
        }
    }

    async fn handle_transfer(&mut self, from: ActorId, msg: &Message) -> Result<(), ProtocolError> {
        let order = msg.transfer_order()?;
        let me = self.ctx.id();

        if order.source == me && from.is_coordinator() {
            self.debit_and_forward(order).await
        } else if order.destination == me && from == order.source {
            self.credit_and_ack(order).await
        } else {
            Err(ProtocolError::MisroutedTransfer {
                local: me,
                from,
                source_actor: order.source,
                destination: order.destination,
            })
        }
    }

    async fn debit_and_forward(&mut self, order: TransferOrder) -> Result<(), ProtocolError> {
        let me = self.ctx.id();
        if self.ctx.balance() < order.amount {
            warn!(actor = %me, balance = self.ctx.balance(), %order, "insufficient funds, order dropped");
            self.stats.dropped += 1;
            return Ok(());
        }

        self.ctx.debit(order.amount)?;
        info!(
            actor = %me,
            time = self.ctx.now(),
            "{}: process {} transferred ${} to process {}",
            self.ctx.now(),
            me,
            order.amount,
            order.destination
        );
        self.ctx.send(order.destination, MessageType::Transfer, order.encode()).await?;
        self.stats.sent += 1;
        Ok(())
    }

    async fn credit_and_ack(&mut self, order: TransferOrder) -> Result<(), ProtocolError> {
        let me = self.ctx.id();
        self.ctx.credit(order.amount)?;
        info!(
            actor = %me,
            time = self.ctx.now(),
            "{}: process {} received ${} from process {}",
            self.ctx.now(),
            me,
            order.amount,
            order.source
        );
        self.ctx.send(ActorId::COORDINATOR, MessageType::Ack, Vec::new()).await?;
        self.stats.received += 1;
        Ok(())
    }
}

/// Runs peer `id` to completion and returns its balance history.
pub async fn run(
    id: ActorId,
    endpoints: ActorEndpoints,
    initial_balance: Balance,
    config: ProtocolConfig,
) -> Result<BalanceHistory, ProtocolError> {
    let actor = PeerActor::new(id, endpoints, initial_balance, config)?;
    Ok(actor.run().await?.history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ChannelMatrix;
    use bankmesh_env::MemoryChannelFactory;

    fn endpoints(n: usize) -> Vec<ActorEndpoints> {
        ChannelMatrix::build(n, &MemoryChannelFactory::default())
            .unwrap()
            .into_endpoints()
    }

    /// Drives the coordinator side by hand for one peer.
    async fn coordinator_handshake(ctx: &mut ActorContext) {
        ctx.startup_barrier().await.unwrap();
    }

    #[test]
    fn test_peer_rejects_foreign_endpoints() {
        let mut eps = endpoints(3);
        let two = eps.pop().unwrap();
        assert!(matches!(
            PeerActor::new(ActorId(1), two, 5, ProtocolConfig::default()),
            Err(SetupError::EndpointMismatch { .. })
        ));
    }

    #[test]
    fn test_peer_rejects_coordinator_id() {
        let mut eps = endpoints(2);
        let _one = eps.pop().unwrap();
        let zero = eps.pop().unwrap();
        assert!(matches!(
            PeerActor::new(ActorId(0), zero, 5, ProtocolConfig::default()),
            Err(SetupError::ReservedCoordinator { .. })
        ));
    }

    #[test]
    fn test_debit_and_credit_stamp_history() {
        let mut eps = endpoints(2);
        let one = eps.pop().unwrap();
        let mut ctx = ActorContext::new(one, 10, ProtocolConfig::default());

        ctx.clock.observe(4);
        ctx.debit(3).unwrap();
        ctx.clock.observe(9);
        ctx.credit(1).unwrap();

        let times: Vec<_> = ctx.history().records().iter().map(|r| (r.time, r.balance)).collect();
        assert_eq!(times, vec![(0, 10), (5, 7), (10, 8)]);
    }

    #[test]
    fn test_credit_past_balance_range_fails() {
        let mut eps = endpoints(2);
        let one = eps.pop().unwrap();
        let mut ctx = ActorContext::new(one, Balance::MAX, ProtocolConfig::default());

        assert!(matches!(
            ctx.credit(1),
            Err(ProtocolError::BalanceOverflow { balance: i64::MAX, delta: 1, .. })
        ));
        assert_eq!(ctx.history().len(), 1);
        ctx.debit(Balance::MAX).unwrap();
        assert_eq!(ctx.balance(), 0);
    }

    #[tokio::test]
    async fn test_source_drops_unaffordable_order() {
        let mut eps = endpoints(3);
        let two = eps.pop().unwrap();
        let one = eps.pop().unwrap();
        let zero = eps.pop().unwrap();

        let mut coordinator = ActorContext::new(zero, 0, ProtocolConfig::default());
        let peer_one = tokio::spawn(PeerActor::new(ActorId(1), one, 5, ProtocolConfig::default()).unwrap().run());
        let peer_two = tokio::spawn(PeerActor::new(ActorId(2), two, 0, ProtocolConfig::default()).unwrap().run());

        coordinator_handshake(&mut coordinator).await;
        let order = TransferOrder::new(ActorId(1), ActorId(2), 50);
        coordinator.send(ActorId(1), MessageType::Transfer, order.encode()).await.unwrap();
        coordinator.broadcast(MessageType::Stop, Vec::new()).await.unwrap();
        coordinator.termination_barrier().await.unwrap();

        let one = peer_one.await.unwrap().unwrap();
        let two = peer_two.await.unwrap().unwrap();
        assert_eq!(one.stats.dropped, 1);
        assert_eq!(one.history.balance(), 5);
        assert_eq!(two.history.balance(), 0);
        assert_eq!(one.history.len(), 1);
    }

    #[tokio::test]
    async fn test_peer_forwards_and_destination_acks() {
        let mut eps = endpoints(3);
        let two = eps.pop().unwrap();
        let one = eps.pop().unwrap();
        let zero = eps.pop().unwrap();

        let mut coordinator = ActorContext::new(zero, 0, ProtocolConfig::default());
        let peer_one = tokio::spawn(run(ActorId(1), one, 10, ProtocolConfig::default()));
        let peer_two = tokio::spawn(run(ActorId(2), two, 0, ProtocolConfig::default()));

        coordinator_handshake(&mut coordinator).await;
        let order = TransferOrder::new(ActorId(1), ActorId(2), 4);
        coordinator.send(ActorId(1), MessageType::Transfer, order.encode()).await.unwrap();
        let ack = coordinator.receive_from(ActorId(2)).await.unwrap();
        assert_eq!(ack.kind(), MessageType::Ack);

        coordinator.broadcast(MessageType::Stop, Vec::new()).await.unwrap();
        coordinator.termination_barrier().await.unwrap();

        let one = peer_one.await.unwrap().unwrap();
        let two = peer_two.await.unwrap().unwrap();
        assert_eq!(one.balance(), 6);
        assert_eq!(two.balance(), 4);

        // Lamport order: the credit happens strictly after the debit.
        let debit_time = one.records()[1].time;
        let credit_time = two.records()[1].time;
        assert!(credit_time > debit_time);
    }

    #[tokio::test]
    async fn test_transfer_from_wrong_sender_is_misrouted() {
        let mut eps = endpoints(3);
        let two = eps.pop().unwrap();
        let one = eps.pop().unwrap();
        let zero = eps.pop().unwrap();

        let mut coordinator = ActorContext::new(zero, 0, ProtocolConfig::default());
        let mut rogue = ActorContext::new(two, 0, ProtocolConfig::default());
        let peer_one = tokio::spawn(run(ActorId(1), one, 10, ProtocolConfig::default()));

        let (_, rogue_started) = tokio::join!(coordinator_handshake(&mut coordinator), rogue.startup_barrier());
        rogue_started.unwrap();

        // Peer 2 claims to relay an order whose source is peer 1.
        let order = TransferOrder::new(ActorId(1), ActorId(2), 1);
        rogue.send(ActorId(1), MessageType::Transfer, order.encode()).await.unwrap();

        assert!(matches!(
            peer_one.await.unwrap(),
            Err(ProtocolError::MisroutedTransfer { from: ActorId(2), .. })
        ));
    }

    #[tokio::test]
    async fn test_unexpected_ack_is_a_violation() {
        let mut eps = endpoints(2);
        let one = eps.pop().unwrap();
        let zero = eps.pop().unwrap();

        let mut coordinator = ActorContext::new(zero, 0, ProtocolConfig::default());
        let peer_one = tokio::spawn(run(ActorId(1), one, 10, ProtocolConfig::default()));

        coordinator_handshake(&mut coordinator).await;
        coordinator.send(ActorId(1), MessageType::Ack, Vec::new()).await.unwrap();

        assert!(matches!(
            peer_one.await.unwrap(),
            Err(ProtocolError::UnexpectedMessage { kind: MessageType::Ack, phase: Phase::Running, .. })
        ));
    }
}

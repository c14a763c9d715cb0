//! Transfer schedules: the policy deciding which orders the coordinator issues.

use bankmesh_core::TransferOrder;
use bankmesh_env::{ActorId, Balance};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;

/// Source of transfer orders for one run.
///
/// The coordinator asks for one order at a time and passes its current
/// ledger (balances indexed by actor ID), so a schedule can adapt to the
/// outcome of earlier orders.
pub trait TransferSchedule {
    /// Short name for logs and reports.
    fn name(&self) -> &str;

    /// Next order, or `None` once the schedule is exhausted.
    fn next_order(&mut self, ledger: &[Balance]) -> Option<TransferOrder>;
}

/// A fixed list of orders, issued in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSchedule {
    orders: VecDeque<TransferOrder>,
}

impl ScriptedSchedule {
    pub fn new(orders: impl IntoIterator<Item = TransferOrder>) -> Self {
        Self {
            orders: orders.into_iter().collect(),
        }
    }

    /// Appends `transfer(source, destination, amount)`.
    pub fn then(mut self, source: u32, destination: u32, amount: Balance) -> Self {
        self.orders
            .push_back(TransferOrder::new(ActorId(source), ActorId(destination), amount));
        self
    }

    /// Orders not issued yet.
    pub fn remaining(&self) -> usize {
        self.orders.len()
    }
}

impl TransferSchedule for ScriptedSchedule {
    fn name(&self) -> &str {
        "scripted"
    }

    fn next_order(&mut self, _ledger: &[Balance]) -> Option<TransferOrder> {
        self.orders.pop_front()
    }
}

/// The classic ring: `transfer(i, i+1, i)` for every peer `i` below the
/// highest ID, then `transfer(max, 1, 1)`.
#[derive(Debug, Clone)]
pub struct BankRobbery {
    max: u32,
    next: u32,
}

impl BankRobbery {
    /// Ring over the peers of an `actor_count`-actor mesh.
    pub fn new(actor_count: usize) -> Self {
        Self {
            max: actor_count.saturating_sub(1) as u32,
            next: 1,
        }
    }
}

impl TransferSchedule for BankRobbery {
    fn name(&self) -> &str {
        "bank_robbery"
    }

    fn next_order(&mut self, _ledger: &[Balance]) -> Option<TransferOrder> {
        let i = self.next;
        if i < self.max {
            self.next += 1;
            return Some(TransferOrder::new(ActorId(i), ActorId(i + 1), i as Balance));
        }
        // With a single peer the closing order would be a self-transfer.
        if i == self.max && self.max > 1 {
            self.next += 1;
            return Some(TransferOrder::new(ActorId(self.max), ActorId(1), 1));
        }
        None
    }
}

/// `count` seeded random orders, each affordable under the ledger at the
/// time it is drawn.
#[derive(Debug, Clone)]
pub struct RandomSchedule {
    rng: ChaCha8Rng,
    remaining: usize,
}

impl RandomSchedule {
    pub fn new(seed: u64, count: usize) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            remaining: count,
        }
    }
}

impl TransferSchedule for RandomSchedule {
    fn name(&self) -> &str {
        "random"
    }

    fn next_order(&mut self, ledger: &[Balance]) -> Option<TransferOrder> {
        if self.remaining == 0 || ledger.len() < 2 {
            return None;
        }
        let funded: Vec<usize> = (0..ledger.len()).filter(|&i| ledger[i] > 0).collect();
        if funded.is_empty() {
            return None;
        }
        self.remaining -= 1;

        let source = funded[self.rng.gen_range(0..funded.len())];
        let mut destination = self.rng.gen_range(0..ledger.len() - 1);
        if destination >= source {
            destination += 1;
        }
        let amount = self.rng.gen_range(1..=ledger[source]);
        Some(TransferOrder::new(
            ActorId::from_index(source),
            ActorId::from_index(destination),
            amount,
        ))
    }
}

/// Schedule selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleKind {
    /// No transfers: barriers and history collection only
    None,

    /// Ring of transfers across every peer
    #[default]
    BankRobbery,

    /// Seeded random affordable transfers
    Random,
}

impl ScheduleKind {
    /// Returns every schedule kind.
    pub fn all() -> Vec<ScheduleKind> {
        vec![ScheduleKind::None, ScheduleKind::BankRobbery, ScheduleKind::Random]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScheduleKind::None => "none",
            ScheduleKind::BankRobbery => "bank_robbery",
            ScheduleKind::Random => "random",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScheduleKind::None => "Start, stop and collect histories without moving money",
            ScheduleKind::BankRobbery => "transfer(i, i+1, i) around the ring, then transfer(max, 1, 1)",
            ScheduleKind::Random => "Seeded random transfers, each affordable when issued",
        }
    }

    /// Instantiates the schedule for an `actor_count`-actor run.
    pub fn build(&self, actor_count: usize, transfers: usize, seed: u64) -> Box<dyn TransferSchedule> {
        match self {
            ScheduleKind::None => Box::new(ScriptedSchedule::default()),
            ScheduleKind::BankRobbery => Box::new(BankRobbery::new(actor_count)),
            ScheduleKind::Random => Box::new(RandomSchedule::new(seed, transfers)),
        }
    }
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScheduleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "idle" => Ok(ScheduleKind::None),
            "bank_robbery" | "bankrobbery" | "robbery" => Ok(ScheduleKind::BankRobbery),
            "random" | "rand" => Ok(ScheduleKind::Random),
            _ => Err(format!("Unknown schedule: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(schedule: &mut dyn TransferSchedule, ledger: &[Balance]) -> Vec<(u32, u32, Balance)> {
        std::iter::from_fn(|| schedule.next_order(ledger))
            .map(|o| (o.source.0, o.destination.0, o.amount))
            .collect()
    }

    #[test]
    fn test_bank_robbery_ring() {
        let mut schedule = BankRobbery::new(4);
        assert_eq!(
            drain(&mut schedule, &[0; 4]),
            vec![(1, 2, 1), (2, 3, 2), (3, 1, 1)]
        );
    }

    #[test]
    fn test_bank_robbery_single_peer_is_empty() {
        let mut schedule = BankRobbery::new(2);
        assert!(drain(&mut schedule, &[0; 2]).is_empty());
    }

    #[test]
    fn test_scripted_in_order() {
        let mut schedule = ScriptedSchedule::default().then(0, 1, 5).then(1, 2, 3);
        assert_eq!(schedule.remaining(), 2);
        assert_eq!(drain(&mut schedule, &[]), vec![(0, 1, 5), (1, 2, 3)]);
    }

    #[test]
    fn test_random_is_seeded_and_affordable() {
        let ledger = [0, 7, 0, 3];
        let a = drain(&mut RandomSchedule::new(9, 20), &ledger);
        let b = drain(&mut RandomSchedule::new(9, 20), &ledger);
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
        for (src, dst, amount) in a {
            assert_ne!(src, dst);
            assert!(amount >= 1 && amount <= ledger[src as usize]);
        }
    }

    #[test]
    fn test_random_stops_when_broke() {
        let mut schedule = RandomSchedule::new(1, 5);
        assert!(schedule.next_order(&[0, 0, 0]).is_none());
    }

    #[test]
    fn test_schedule_kind_parsing() {
        for kind in ScheduleKind::all() {
            assert_eq!(kind.name().parse::<ScheduleKind>(), Ok(kind));
        }
        assert!("ponzi".parse::<ScheduleKind>().is_err());
    }
}

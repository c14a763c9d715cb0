//! Per-actor balance history and the coordinator's collection of them.
//!
//! A history is the actor's event log: the initial balance at time 0 and
//! one record per applied debit or credit, in logical-time order.
//! [`BalanceHistory::fill_gaps`] expands it into one record per time step.

use bankmesh_env::{ActorId, Balance, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Balance of one actor right after one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    /// Balance after the event
    pub balance: Balance,

    /// Logical time of the event
    pub time: Timestamp,

    /// Credits in flight but not yet applied (reserved, always 0 here)
    pub pending_in: Balance,
}

/// Append-only, time-ordered balance log owned by one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceHistory {
    actor: ActorId,
    records: Vec<BalanceRecord>,
}

impl BalanceHistory {
    /// Starts a history with the initial balance at time 0.
    pub fn new(actor: ActorId, initial: Balance) -> Self {
        Self {
            actor,
            records: vec![BalanceRecord {
                balance: initial,
                time: 0,
                pending_in: 0,
            }],
        }
    }

    /// Rebuilds a history received off the wire.
    ///
    /// Rejects an empty record list and out-of-order times.
    pub fn from_records(actor: ActorId, records: Vec<BalanceRecord>) -> Result<Self, String> {
        if records.is_empty() {
            return Err("history has no records".to_string());
        }
        if let Some(w) = records.windows(2).find(|w| w[1].time < w[0].time) {
            return Err(format!("time goes backwards: {} after {}", w[1].time, w[0].time));
        }
        Ok(Self { actor, records })
    }

    /// Appends the balance after an event at logical time `time`.
    ///
    /// `time` is clamped so the log never goes backwards.
    pub fn record(&mut self, balance: Balance, time: Timestamp) {
        let time = time.max(self.last().time);
        self.records.push(BalanceRecord {
            balance,
            time,
            pending_in: 0,
        });
    }

    /// Owning actor.
    pub fn actor(&self) -> ActorId {
        self.actor
    }

    /// Every record, oldest first.
    pub fn records(&self) -> &[BalanceRecord] {
        &self.records
    }

    /// Most recent record. A history is never empty.
    pub fn last(&self) -> &BalanceRecord {
        &self.records[self.records.len() - 1]
    }

    /// Current balance.
    pub fn balance(&self) -> Balance {
        self.last().balance
    }

    /// Balances only, oldest first.
    pub fn balances(&self) -> Vec<Balance> {
        self.records.iter().map(|r| r.balance).collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Balance in effect at logical time `t`.
    pub fn balance_at(&self, t: Timestamp) -> Balance {
        self.records
            .iter()
            .take_while(|r| r.time <= t)
            .last()
            .unwrap_or(&self.records[0])
            .balance
    }

    /// Dense view: exactly one record per time step `0..=horizon`.
    ///
    /// Steps without an event repeat the balance of the latest earlier
    /// event. When several events share a step, the last one wins. Events
    /// after `horizon` are cut off.
    pub fn fill_gaps(&self, horizon: Timestamp) -> BalanceHistory {
        let records = (0..=horizon)
            .map(|t| BalanceRecord {
                balance: self.balance_at(t),
                time: t,
                pending_in: 0,
            })
            .collect();
        Self {
            actor: self.actor,
            records,
        }
    }
}

/// Coordinator-side collection of every actor's history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllHistories {
    expected: usize,
    histories: BTreeMap<ActorId, BalanceHistory>,
}

impl AllHistories {
    /// Creates an empty collection expecting one history per actor of an
    /// `n`-actor run.
    pub fn new(n: usize) -> Self {
        Self {
            expected: n,
            histories: BTreeMap::new(),
        }
    }

    /// Stores a history. Returns false if that actor already reported.
    pub fn insert(&mut self, history: BalanceHistory) -> bool {
        let actor = history.actor();
        if self.histories.contains_key(&actor) {
            return false;
        }
        self.histories.insert(actor, history);
        true
    }

    /// True once every actor has reported.
    pub fn is_complete(&self) -> bool {
        self.histories.len() == self.expected
    }

    /// Actors that have not reported yet.
    pub fn missing(&self) -> Vec<ActorId> {
        ActorId::all(self.expected)
            .filter(|id| !self.histories.contains_key(id))
            .collect()
    }

    /// History of one actor.
    pub fn get(&self, actor: ActorId) -> Option<&BalanceHistory> {
        self.histories.get(&actor)
    }

    /// Histories in ascending actor order.
    pub fn iter(&self) -> impl Iterator<Item = &BalanceHistory> {
        self.histories.values()
    }

    /// Number of histories collected.
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    /// True if nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Latest event time across all histories.
    pub fn horizon(&self) -> Timestamp {
        self.iter().map(|h| h.last().time).max().unwrap_or(0)
    }

    /// Sum of every actor's current balance, `None` if it overflows.
    pub fn total_balance(&self) -> Option<Balance> {
        self.iter().try_fold(0 as Balance, |total, h| total.checked_add(h.balance()))
    }

    /// Every history expanded to the common horizon.
    pub fn dense(&self) -> Vec<BalanceHistory> {
        let horizon = self.horizon();
        self.iter().map(|h| h.fill_gaps(horizon)).collect()
    }
}

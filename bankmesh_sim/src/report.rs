//! Run report: final balances, histories and the per-time-step table.
//!
//! Serialized with serde for `--json` and `--export`.

use bankmesh_core::{AllHistories, RejectedTransfer, TransferOrder, TransferStats};
use bankmesh_env::{ActorId, Balance, Timestamp};
use serde::Serialize;
use std::fs::File;
use std::io::Write;

/// Per-actor summary.
#[derive(Debug, Clone, Serialize)]
pub struct ActorSummary {
    pub id: ActorId,
    pub initial_balance: Balance,
    pub final_balance: Balance,

    /// Logical clock when the actor exited
    pub final_time: Timestamp,

    /// Transfer counters (all zero for the coordinator)
    pub stats: TransferStats,

    /// Peers a STARTED was received from
    pub started_from: Vec<ActorId>,

    /// Peers a DONE was received from
    pub done_from: Vec<ActorId>,
}

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Schedule name
    pub schedule: String,

    /// Channel backend name
    pub backend: String,

    /// Termination topology
    pub termination: String,

    /// Seed the schedule was built from
    pub seed: u64,

    pub actors: Vec<ActorSummary>,

    /// Orders that went through, in issue order
    pub completed: Vec<TransferOrder>,

    /// Orders the coordinator refused
    pub rejected: Vec<RejectedTransfer>,

    pub total_before: Balance,
    pub total_after: Balance,

    /// Event-log histories as collected by the coordinator
    pub histories: AllHistories,
}

impl RunReport {
    /// True if no money was created or destroyed.
    pub fn is_conserved(&self) -> bool {
        self.total_before == self.total_after
    }

    /// Final balances indexed by actor ID.
    pub fn final_balances(&self) -> Vec<Balance> {
        self.actors.iter().map(|a| a.final_balance).collect()
    }

    /// Orders dropped by sources for lack of funds.
    pub fn dropped(&self) -> usize {
        self.actors.iter().map(|a| a.stats.dropped).sum()
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes the JSON report to `path`.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Balance of every actor at every logical time step, up to the
    /// latest event of the run.
    ///
    /// ```text
    ///  time |    0 |    1 |    2
    /// ------+------+------+------
    ///     0 |  100 |    0 |    0
    ///     1 |   70 |    0 |    0
    /// ```
    pub fn history_table(&self) -> String {
        let dense = self.histories.dense();
        let width = dense
            .iter()
            .flat_map(|h| h.records().iter().map(|r| r.balance.to_string().len()))
            .max()
            .unwrap_or(1)
            .max(4);

        let mut out = format!("{:>5}", "time");
        for h in &dense {
            out.push_str(&format!(" | {:>width$}", h.actor().to_string(), width = width));
        }
        out.push('\n');
        out.push_str(&"-".repeat(6));
        for _ in &dense {
            out.push('+');
            out.push_str(&"-".repeat(width + 2));
        }
        out.push('\n');

        let horizon = self.histories.horizon();
        for t in 0..=horizon as usize {
            out.push_str(&format!("{:>5}", t));
            for h in &dense {
                out.push_str(&format!(" | {:>width$}", h.records()[t].balance, width = width));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankmesh_core::BalanceHistory;

    fn report() -> RunReport {
        let mut histories = AllHistories::new(2);
        let mut zero = BalanceHistory::new(ActorId(0), 100);
        zero.record(70, 1);
        let mut one = BalanceHistory::new(ActorId(1), 0);
        one.record(30, 3);
        histories.insert(zero);
        histories.insert(one);

        RunReport {
            schedule: "scripted".to_string(),
            backend: "memory".to_string(),
            termination: "full-mesh".to_string(),
            seed: 42,
            actors: vec![
                ActorSummary {
                    id: ActorId(0),
                    initial_balance: 100,
                    final_balance: 70,
                    final_time: 6,
                    stats: TransferStats::default(),
                    started_from: vec![ActorId(1)],
                    done_from: vec![ActorId(1)],
                },
                ActorSummary {
                    id: ActorId(1),
                    initial_balance: 0,
                    final_balance: 30,
                    final_time: 5,
                    stats: TransferStats::default(),
                    started_from: vec![ActorId(0)],
                    done_from: vec![ActorId(0)],
                },
            ],
            completed: vec![TransferOrder::new(ActorId(0), ActorId(1), 30)],
            rejected: Vec::new(),
            total_before: 100,
            total_after: 100,
            histories,
        }
    }

    #[test]
    fn test_history_table_fills_every_step() {
        let table = report().history_table();
        let rows: Vec<&str> = table.lines().collect();

        // header + rule + times 0..=3
        assert_eq!(rows.len(), 6);
        assert!(rows[2].ends_with("100 |    0"));
        assert!(rows[3].ends_with(" 70 |    0"));
        assert!(rows[4].ends_with(" 70 |    0"));
        assert!(rows[5].ends_with(" 70 |   30"));
    }

    #[test]
    fn test_json_carries_histories() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json().unwrap()).unwrap();
        assert_eq!(json["total_after"], 100);
        assert_eq!(json["completed"][0]["amount"], 30);
        assert_eq!(json["histories"]["histories"]["1"]["records"][1]["balance"], 30);
    }

    #[test]
    fn test_write_to_file() {
        let path = std::env::temp_dir().join("bankmesh_report_test.json");
        let path = path.to_string_lossy().into_owned();
        report().write_to_file(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"schedule\": \"scripted\""));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_conservation_flags() {
        let mut r = report();
        assert!(r.is_conserved());
        r.total_after = 99;
        assert!(!r.is_conserved());
        assert_eq!(r.final_balances(), vec![70, 30]);
    }
}

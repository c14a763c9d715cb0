//! Whole-run scenarios over the simulation harness.

use async_trait::async_trait;
use bankmesh_core::{Phase, ProtocolConfig, ProtocolError, SetupError, TerminationMode, TransferError, TransferOrder};
use bankmesh_env::{
    ActorId, ByteSink, ChannelError, ChannelFactory, ChannelReader, ChannelWriter, MemoryChannelFactory,
};
use bankmesh_sim::scenarios::{BankRobbery, RandomSchedule, ScheduleKind, ScriptedSchedule};
use bankmesh_sim::{Backend, RunError, SimConfig, SimWorld};
use proptest::prelude::*;
use std::time::Duration;

/// Sink whose writes never complete. Holds the real writer so the
/// channel stays open.
struct StalledSink {
    _writer: ChannelWriter,
}

#[async_trait]
impl ByteSink for StalledSink {
    async fn write(&mut self, _frame: &[u8]) -> Result<usize, ChannelError> {
        futures::future::pending().await
    }
}

/// Memory channels, except that everything `mute` writes stalls forever.
struct MuteActorFactory {
    inner: MemoryChannelFactory,
    mute: ActorId,
}

impl ChannelFactory for MuteActorFactory {
    fn open(&self, from: ActorId, to: ActorId) -> Result<(ChannelWriter, ChannelReader), ChannelError> {
        let (writer, reader) = self.inner.open(from, to)?;
        if from == self.mute {
            return Ok((ChannelWriter::new(StalledSink { _writer: writer }), reader));
        }
        Ok((writer, reader))
    }

    fn name(&self) -> &'static str {
        "memory-mute"
    }
}

fn balances_of(report: &bankmesh_sim::RunReport, id: u32) -> Vec<i64> {
    report.histories.get(ActorId(id)).unwrap().balances()
}

#[tokio::test]
async fn test_seeded_coordinator_scenario() {
    let world = SimWorld::new(SimConfig::default().with_balances(vec![100, 0, 0]));
    let mut schedule = ScriptedSchedule::default().then(0, 1, 30).then(1, 2, 10);
    let report = world.run(&mut schedule).await.unwrap();

    assert_eq!(report.final_balances(), vec![70, 20, 10]);
    assert_eq!(balances_of(&report, 0), vec![100, 70]);
    assert_eq!(balances_of(&report, 1), vec![0, 30, 20]);
    assert_eq!(balances_of(&report, 2), vec![0, 10]);
    assert_eq!(
        report.completed,
        vec![
            TransferOrder::new(ActorId(0), ActorId(1), 30),
            TransferOrder::new(ActorId(1), ActorId(2), 10),
        ]
    );
}

#[tokio::test]
async fn test_overdraft_leaves_balances_untouched() {
    let world = SimWorld::new(SimConfig::default().with_balances(vec![100, 0, 0]));
    let mut schedule = ScriptedSchedule::default().then(0, 1, 1000);
    let report = world.run(&mut schedule).await.unwrap();

    assert_eq!(report.final_balances(), vec![100, 0, 0]);
    assert_eq!(report.rejected.len(), 1);
    assert!(report.completed.is_empty());
    assert!(report.histories.iter().all(|h| h.len() == 1));
}

#[tokio::test]
async fn test_every_actor_sees_every_barrier_message() {
    for n in 2..=6 {
        let world = SimWorld::new(SimConfig::default().with_balances(vec![5; n]));
        let report = world.run(&mut BankRobbery::new(n)).await.unwrap();

        for actor in &report.actors {
            let peers: Vec<ActorId> = actor.id.peers(n).collect();
            assert_eq!(actor.started_from, peers, "STARTED seen by {}", actor.id);
            assert_eq!(actor.done_from, peers, "DONE seen by {}", actor.id);
        }
        assert!(report.is_conserved());
    }
}

#[tokio::test]
async fn test_coordinator_centric_termination() {
    let protocol = ProtocolConfig::default().with_termination(TerminationMode::CoordinatorCentric);
    let world = SimWorld::new(
        SimConfig::default()
            .with_balances(vec![0, 4, 4, 4, 4])
            .with_protocol(protocol),
    );
    let report = world.run(&mut BankRobbery::new(5)).await.unwrap();

    for actor in &report.actors {
        if actor.id.is_coordinator() {
            assert_eq!(actor.done_from.len(), 4);
        } else {
            assert_eq!(actor.done_from, vec![ActorId::COORDINATOR]);
        }
    }
    assert_eq!(report.termination, "coordinator");
    assert!(report.is_conserved());
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_backend_matches_memory() {
    let balances = vec![20, 3, 0, 9];
    let memory = SimWorld::new(SimConfig::default().with_balances(balances.clone()))
        .run(&mut RandomSchedule::new(7, 25))
        .await
        .unwrap();
    let unix = SimWorld::new(
        SimConfig::default()
            .with_balances(balances)
            .with_backend(Backend::Unix),
    )
    .run(&mut RandomSchedule::new(7, 25))
    .await
    .unwrap();

    assert_eq!(unix.backend, "unix");
    assert_eq!(unix.final_balances(), memory.final_balances());
    assert_eq!(unix.completed, memory.completed);
}

#[tokio::test]
async fn test_tiny_channel_capacity_still_completes() {
    let world = SimWorld::new(
        SimConfig::default()
            .with_balances(vec![50, 10, 10, 10, 10, 10])
            .with_capacity(1),
    );
    let report = world.run(&mut RandomSchedule::new(3, 40)).await.unwrap();
    assert!(report.is_conserved());
    assert_eq!(report.completed.len() + report.rejected.len(), 40);
}

#[tokio::test]
async fn test_idle_schedule_collects_initial_histories() {
    let world = SimWorld::new(SimConfig::default().with_balances(vec![1, 2, 3]));
    let mut schedule = ScheduleKind::None.build(3, 0, 0);
    let report = world.run(schedule.as_mut()).await.unwrap();

    assert!(report.histories.is_complete());
    assert_eq!(report.final_balances(), vec![1, 2, 3]);
    assert_eq!(report.histories.horizon(), 0);
}

#[tokio::test]
async fn test_silent_actor_fails_the_run_on_barrier_timeout() {
    let protocol = ProtocolConfig::default().with_barrier_timeout(Duration::from_millis(100));
    let world = SimWorld::new(SimConfig::default().with_protocol(protocol));
    let factory = MuteActorFactory {
        inner: MemoryChannelFactory::default(),
        mute: ActorId(3),
    };
    let result = world.run_with(&factory, &mut ScriptedSchedule::default()).await;

    // Whoever times out first ends the run; each has heard from 2 of its 3 peers.
    let timeout = match result {
        Err(RunError::Coordinator(TransferError::Protocol(e))) => e,
        Err(RunError::ActorFailed { actor, source }) => {
            assert_ne!(actor, ActorId(3));
            source
        }
        other => panic!("expected a barrier timeout, got {:?}", other.map(|r| r.final_balances())),
    };
    match timeout {
        ProtocolError::BarrierTimeout {
            phase,
            seen,
            expected,
            after,
        } => {
            assert_eq!(phase, Phase::AwaitingPeersStarted);
            assert_eq!((seen, expected), (2, 3));
            assert_eq!(after, Duration::from_millis(100));
        }
        other => panic!("expected BarrierTimeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_overflowing_balances_are_refused() {
    let world = SimWorld::new(SimConfig::default().with_balances(vec![i64::MAX, 1]));
    assert!(matches!(
        world.run(&mut ScriptedSchedule::default()).await,
        Err(RunError::Setup(SetupError::TotalBalanceOverflow { .. }))
    ));

    let world = SimWorld::new(SimConfig::default().with_balances(vec![i64::MAX, 0, 5]));
    let mut schedule = ScriptedSchedule::default().then(2, 0, 1);
    assert!(matches!(
        world.run(&mut schedule).await,
        Err(RunError::Setup(SetupError::TotalBalanceOverflow { .. }))
    ));
}

#[tokio::test]
async fn test_balances_near_the_limit_still_transfer() {
    let world = SimWorld::new(SimConfig::default().with_balances(vec![i64::MAX - 5, 0, 5]));
    let mut schedule = ScriptedSchedule::default().then(2, 0, 5).then(0, 1, i64::MAX);
    let report = world.run(&mut schedule).await.unwrap();

    assert_eq!(report.final_balances(), vec![0, i64::MAX, 0]);
    assert_eq!(report.total_after, i64::MAX);
}

#[tokio::test]
async fn test_invalid_shape_fails_before_start() {
    let world = SimWorld::new(SimConfig::default().with_balances(vec![0; 17]));
    assert!(matches!(
        world.run(&mut ScriptedSchedule::default()).await,
        Err(RunError::Setup(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_random_runs_conserve_money(
        balances in proptest::collection::vec(0i64..50, 2..7),
        seed in any::<u64>(),
        transfers in 0usize..30,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let total: i64 = balances.iter().sum();
        let world = SimWorld::new(SimConfig::default().with_balances(balances.clone()));
        let report = runtime
            .block_on(world.run(&mut RandomSchedule::new(seed, transfers)))
            .unwrap();

        prop_assert_eq!(report.total_after, total);
        prop_assert!(report.rejected.is_empty());
        for (i, history) in report.histories.iter().enumerate() {
            prop_assert_eq!(history.balances()[0], balances[i]);
            prop_assert!(history.records().windows(2).all(|w| w[0].time <= w[1].time));
        }
    }
}

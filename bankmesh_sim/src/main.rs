//! BankMesh Simulator CLI
//!
//! Runs one coordinator and N peers over a full channel mesh and prints
//! every actor's balance history.

use bankmesh_core::{ProtocolConfig, TerminationMode, MAX_HISTORY_RECORDS};
use bankmesh_env::{Balance, DEFAULT_CAPACITY};
use bankmesh_sim::scenarios::ScheduleKind;
use bankmesh_sim::{Backend, SimConfig, SimWorld};
use clap::Parser;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// BankMesh channel-matrix transfer simulator
#[derive(Parser, Debug)]
#[command(name = "bankmesh-sim")]
#[command(about = "Run a coordinator-driven transfer simulation over a full channel mesh", long_about = None)]
struct Args {
    /// Number of peer processes (the coordinator comes on top)
    #[arg(short, long)]
    processes: usize,

    /// Initial balance of each peer, one per process
    #[arg(allow_negative_numbers = true)]
    balances: Vec<Balance>,

    /// Initial balance of the coordinator's own account
    #[arg(long, default_value = "0")]
    coordinator_balance: Balance,

    /// Transfer schedule (none, bank_robbery, random)
    #[arg(short = 'S', long, default_value = "bank_robbery")]
    schedule: String,

    /// Number of transfers for the random schedule
    #[arg(short, long, default_value = "10")]
    transfers: usize,

    /// Seed for the random schedule (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Channel backend (memory, unix)
    #[arg(long, default_value = "memory")]
    backend: String,

    /// Frames buffered per in-process channel
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,

    /// Termination barrier topology (full-mesh, coordinator)
    #[arg(long, default_value = "full-mesh")]
    termination: String,

    /// Give up on an acknowledgement after this many milliseconds
    #[arg(long)]
    ack_timeout_ms: Option<u64>,

    /// Give up on a barrier after this many milliseconds
    #[arg(long)]
    barrier_timeout_ms: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Write the JSON report to this file
    #[arg(long)]
    export: Option<String>,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn build_config(args: &Args) -> (SimConfig, ScheduleKind) {
    if args.balances.len() != args.processes {
        fail(format!(
            "-p {} needs {} balances, got {}",
            args.processes,
            args.processes,
            args.balances.len()
        ));
    }
    if args.transfers >= MAX_HISTORY_RECORDS {
        fail(format!(
            "--transfers {} exceeds the history frame limit of {}",
            args.transfers,
            MAX_HISTORY_RECORDS - 1
        ));
    }

    let schedule: ScheduleKind = args.schedule.parse().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("Available schedules: none, bank_robbery, random");
        std::process::exit(1);
    });
    let backend: Backend = args.backend.parse().unwrap_or_else(|e| fail(e));
    let termination: TerminationMode = args.termination.parse().unwrap_or_else(|e| fail(e));

    let mut protocol = ProtocolConfig::default().with_termination(termination);
    if let Some(ms) = args.ack_timeout_ms {
        protocol = protocol.with_ack_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = args.barrier_timeout_ms {
        protocol = protocol.with_barrier_timeout(Duration::from_millis(ms));
    }

    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let mut balances = Vec::with_capacity(args.processes + 1);
    balances.push(args.coordinator_balance);
    balances.extend_from_slice(&args.balances);

    let config = SimConfig::default()
        .with_balances(balances)
        .with_backend(backend)
        .with_capacity(args.capacity)
        .with_protocol(protocol)
        .with_seed(seed);
    (config, schedule)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let (config, schedule_kind) = build_config(&args);
    if !args.json {
        info!("BankMesh Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!(
            "{} actors, schedule {} ({}), seed {}",
            config.actor_count(),
            schedule_kind,
            schedule_kind.description(),
            config.seed
        );
    }

    let mut schedule = schedule_kind.build(config.actor_count(), args.transfers, config.seed);
    let world = SimWorld::new(config);
    let report = match world.run(schedule.as_mut()).await {
        Ok(report) => report,
        Err(e) => {
            error!("✗ run FAILED: {}", e);
            if args.json {
                let summary = serde_json::json!({ "passed": false, "error": e.to_string() });
                println!("{}", summary);
            }
            std::process::exit(1);
        }
    };

    if let Some(path) = &args.export {
        match report.write_to_file(path) {
            Ok(()) => info!("Exported report to {}", path),
            Err(e) => {
                error!("Failed to write export: {:?}", e);
                std::process::exit(1);
            }
        }
    }

    if args.json {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => fail(e),
        }
    } else {
        print!("{}", report.history_table());
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!(
            "✅ {} transfers completed, {} rejected, {} dropped; total ${} conserved",
            report.completed.len(),
            report.rejected.len(),
            report.dropped(),
            report.total_after
        );
    }
}

//! Press simulator - bank-dispatch example
//!
//! Wires the engine to in-memory instances and a recording surface, fills one
//! button with actions and presses it:
//! 1. Actions are added through `BankCommand`s, like a web UI would
//! 2. The press runs through the `EngineRuntime` loop
//! 3. Delayed actions fire on their timers (or are aborted)
//! 4. Every host call is printed in order
//!
//! # Usage
//!
//! ```sh
//! # Three actions, absolute delays
//! cargo run -p press-sim -- --delays 100,0,200
//!
//! # Relative delays, abort after 150ms
//! cargo run -p press-sim -- --delays 100,0,200 --relative --abort-after 150
//!
//! # Latching button, with engine logs
//! RUST_LOG=bank_dispatch_core=debug cargo run -p press-sim -- --latch
//! ```

use std::path::PathBuf;
use std::time::Duration;

use bank_dispatch::testing::{HostEvent, TestRig};
use bank_dispatch::{
    BankCommand, BankConfig, BankId, Direction, EngineConfig, EngineRuntime, LoggingMiddleware,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Press simulator - bank-dispatch example
#[derive(Parser, Debug)]
#[command(name = "press-sim")]
#[command(about = "Simulate button presses against in-memory instances")]
struct Args {
    /// Comma separated delays (ms) of the actions on the button
    #[arg(long, short, value_delimiter = ',', default_value = "0,250,500")]
    delays: Vec<u64>,

    /// Delays accumulate down the list
    #[arg(long)]
    relative: bool,

    /// Make the button latching (press twice to run the release list)
    #[arg(long)]
    latch: bool,

    /// Abort the button this many ms after the press
    #[arg(long)]
    abort_after: Option<u64>,

    /// Engine configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

const BANK: BankId = BankId::new(1, 1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };

    let rig = TestRig::new();
    rig.instance("mixer", &["fade", "cut"]);
    rig.banks.set(
        BANK,
        BankConfig {
            latch: args.latch,
            ..BankConfig::default()
        }
        .relative(args.relative),
    );

    let runtime = EngineRuntime::new(rig.engine_with(config))
        .with_middleware(LoggingMiddleware::verbose())
        .with_command_log();
    let commands = runtime.command_log();
    let handle = runtime.handle();
    let task = tokio::spawn(runtime.run());
    handle.instances_loaded(rig.registry.ids())?;

    for (index, delay) in args.delays.iter().enumerate() {
        let kind = if index % 2 == 0 { "fade" } else { "cut" };
        let response = handle
            .request(BankCommand::AddAction {
                bank: BANK,
                direction: Direction::Press,
                instance_id: "mixer".into(),
                kind: kind.into(),
            })
            .await?;
        let id = response
            .actions()
            .and_then(|list| list.last())
            .map(|action| action.id.clone())
            .ok_or("action was not added")?;
        handle
            .request(BankCommand::UpdateDelay {
                bank: BANK,
                direction: Direction::Press,
                id,
                delay: *delay,
            })
            .await?;
    }
    handle
        .request(BankCommand::AddAction {
            bank: BANK,
            direction: Direction::Release,
            instance_id: "mixer".into(),
            kind: "cut".into(),
        })
        .await?;
    rig.recorder.drain();

    handle.press(BANK, Direction::Press, Some("sim"))?;
    handle.press(BANK, Direction::Release, Some("sim"))?;
    if args.latch {
        // Second physical press unlatches
        handle.press(BANK, Direction::Press, Some("sim"))?;
        handle.press(BANK, Direction::Release, Some("sim"))?;
    }

    if let Some(abort_after) = args.abort_after {
        tokio::time::sleep(Duration::from_millis(abort_after)).await;
        handle.abort_bank(BANK, false)?;
    }

    let longest = args.delays.iter().copied().max().unwrap_or(0);
    let total: u64 = args.delays.iter().sum();
    let wait = if args.relative { total } else { longest };
    tokio::time::sleep(Duration::from_millis(wait + 50)).await;

    handle.shutdown()?;
    let engine = task.await?;

    if let Some(commands) = commands {
        let log = commands.lock().map_err(|_| "command log poisoned")?;
        for entry in log.entries() {
            println!(
                "command  #{} {} mutating={} changed={:?}",
                entry.sequence, entry.name, entry.mutating, entry.changed
            );
        }
    }
    for event in rig.recorder.drain() {
        println!("{}", describe(&event));
    }
    println!(
        "running: {}, pending timers: {}",
        engine.is_running(BANK),
        engine.pending_timers()
    );
    Ok(())
}

fn describe(event: &HostEvent) -> String {
    match event {
        HostEvent::Executed { kind, id, .. } => format!("run      {kind} ({id})"),
        HostEvent::Indicated { pushed, .. } => {
            format!("indicate {}", if *pushed { "down" } else { "up" })
        }
        HostEvent::Invalidated(bank) => format!("redraw   {bank}"),
        other => format!("{other:?}"),
    }
}

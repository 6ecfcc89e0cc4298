// Path: crates/node/src/bin/keel.rs
//! The keel demo node: drives the chat network, replays a data directory,
//! or validates its write-ahead log.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keel_node::{chat_tx, demo_genesis, Runtime};
use keel_storage::{replay, validate_wal, ReplaySettings, Store};
use keel_types::config::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keel", about = "Hierarchical BFT replication engine demo node")]
struct Cli {
    /// Data directory for the WAL and snapshots.
    #[arg(long, default_value = "keel-data")]
    data_dir: PathBuf,

    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the demo chat network for a number of ticks.
    Run {
        /// How many ticks to drive.
        #[arg(long, default_value_t = 12)]
        ticks: u64,
    },
    /// Rebuild the state from the WAL and print the recovered heights.
    Replay {
        /// Skip hash and root validation.
        #[arg(long)]
        no_validate: bool,
    },
    /// Check the WAL's structural invariants.
    Validate,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(Config::default()),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Cmd::Run { ticks } => {
            let net = demo_genesis(&config)?;
            let mut runtime = Runtime::open(
                &cli.data_dir,
                // The demo runtime holds every member's keys; a production
                // deployment would hold exactly one.
                net.oracle,
                keel_entity::ChatApp,
                config.clone(),
            )?;

            let net = demo_genesis(&config)?; // fresh handle for tx building
            let mut external = vec![net.import_envelope()];
            let sender = net.members[0];
            let mut nonce = 0u64;

            for round in 0..ticks {
                if round % 4 == 0 {
                    let tx = chat_tx(runtime.oracle(), sender, nonce, &format!("message {nonce}"))?;
                    external.extend(net.broadcast_tx(&tx));
                    nonce += 1;
                }
                let result = runtime.tick(&external)?;
                external = Vec::new();
                info!(
                    height = result.frame.height,
                    root = %result.frame.root,
                    outbox = result.outbox.len(),
                    "tick"
                );
                std::thread::sleep(std::time::Duration::from_millis(config.tick_interval_ms));
            }

            for (key, replica) in &runtime.state().replicas {
                println!(
                    "{key}: height {} domain {}",
                    replica.last.height,
                    String::from_utf8_lossy(&replica.last.state.domain)
                );
            }
            Ok(())
        }
        Cmd::Replay { no_validate } => {
            let net = demo_genesis(&config)?;
            let store = Store::open(cli.data_dir.join("keel.redb"))?;
            let state = replay(
                &store,
                &keel_entity::ChatApp,
                &net.oracle,
                &config,
                &ReplaySettings {
                    validate: !no_validate,
                    compact_interval: config.compact_interval,
                },
            )?;
            println!("replayed to height {}", state.height);
            for (key, replica) in &state.replicas {
                println!("{key}: height {}", replica.last.height);
            }
            Ok(())
        }
        Cmd::Validate => {
            let store = Store::open(cli.data_dir.join("keel.redb"))?;
            let summary = validate_wal(&store)?;
            println!(
                "wal ok: {} entries, {} frames, heights {:?}..{:?}",
                summary.entries, summary.frames, summary.first_height, summary.last_height
            );
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    run(Cli::parse())
}

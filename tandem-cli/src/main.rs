//! `tandem`: manage this device's stores and sync them with a peer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tandem_cli::{LocalDevice, TandemConfig, config, logging, run};
use tandem_sync::p2p::P2pNetwork;
use tandem_types::{DeviceId, StoreName};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "tandem", version)]
#[command(about = "Peer-to-peer sync for Tandem stores")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "TANDEM_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Data directory holding tandem.db
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print this device's ID
    Id,
    /// Forget this device's ID; a new one is generated on next use
    ResetId,
    /// List syncable stores and their sync preference
    Stores,
    /// Opt a store into sync
    Enable { store: StoreName },
    /// Opt a store out of sync
    Disable { store: StoreName },
    /// Replace a store's data with a JSON object read from a file
    Import { store: StoreName, file: PathBuf },
    /// Print the snapshot a peer would receive
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Answer sync requests from peers until Ctrl-C
    Serve,
    /// Pull a peer's data into this device
    Sync {
        /// The peer's device ID
        peer: DeviceId,
        /// Seconds to wait for the peer's data after connecting
        #[arg(long, default_value = "30")]
        wait: u64,
    },
}

fn resolve_config(cli: &Cli) -> Result<TandemConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    }
    .context("loading configuration")?;

    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(file) = &cli.log_file {
        config.log_file = Some(file.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let _log_guard = logging::init(&config.log_level, cli.verbose, config.log_file.as_deref())?;

    let device = LocalDevice::open(&config.data_dir)?;

    match cli.command {
        Command::Id => println!("{}", device.device_id()),
        Command::ResetId => {
            device.reset_identity()?;
            println!("Device ID reset; a new one is generated on next use");
        }
        Command::Stores => {
            for summary in device.summaries() {
                let updated = summary
                    .last_updated
                    .map_or_else(|| "never".to_string(), |t| t.to_string());
                let state = if summary.is_sync_enabled { "on" } else { "off" };
                println!("{:<16} sync {:<4} updated {}", summary.name.as_str(), state, updated);
            }
        }
        Command::Enable { store } => device.set_sync_enabled(store, true)?,
        Command::Disable { store } => device.set_sync_enabled(store, false)?,
        Command::Import { store, file } => device.import(store, &file)?,
        Command::Export { output } => {
            let json = serde_json::to_string_pretty(&device.export()?)?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{json}"),
            }
        }
        Command::Serve => {
            let network = Arc::new(P2pNetwork::new(config.p2p_config()?));
            println!("Serving as {}. Press Ctrl-C to stop.", device.device_id());
            run::serve(&device, network, config.session_config(), async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl-C: {e}");
                }
            })
            .await?;
        }
        Command::Sync { peer, wait } => {
            let network = Arc::new(P2pNetwork::new(config.p2p_config()?));
            let report = run::sync_once(
                &device,
                network,
                config.session_config(),
                peer,
                Duration::from_secs(wait),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                warn!("{} store(s) failed to merge", report.errors.len());
            }
        }
    }

    Ok(())
}

use std::path::PathBuf;

use anyhow::Context as _;
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use clap::Parser;
use log::{info, warn};
use tokio::sync::mpsc;

mod classifier;
mod config;
mod cycle;
mod display;
mod export;
mod messages;
mod registry;
mod scanner;
mod transport;

/// Tracks nearby BLE beacons and reports them to a collector.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = config::AppConfig::load(&args.config)?;
    let settings = config.settings();
    let scanner_id = config.scanner_id();
    info!("Scanner id: {}", scanner_id);
    info!("Settings: {:?}", settings);

    let uplink = match config.server.clone() {
        Some(server) => {
            let transport = transport::HttpTransport::new(&server)?;
            Some(cycle::Uplink { server, transport })
        }
        None => {
            warn!("Network not configured, exports disabled");
            None
        }
    };

    let bt_manager = Manager::new().await?;

    // get the first bluetooth adapter
    let adapters = bt_manager.adapters().await?;
    let central = adapters
        .into_iter()
        .next()
        .context("no bluetooth adapter found")?;

    let (tx, rx) = mpsc::channel(64);
    let scanner = scanner::BtleScanner::new(central, tx);

    let known_names = config
        .devices
        .unwrap_or_default()
        .into_iter()
        .map(|device| (registry::DeviceIdentity::from(device.address), device.name));

    let mut core = cycle::ReportingCycle::new(
        settings,
        scanner_id,
        scanner,
        uplink,
        display::LogDisplay,
    )
    .with_known_names(known_names);
    core.run_loop(rx, tokio::signal::ctrl_c()).await?;

    Ok(())
}

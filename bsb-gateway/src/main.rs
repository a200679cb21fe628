//! BSB Gateway
//!
//! Connects to a heating controller over a BSB serial adapter (or a built-in
//! simulated controller), traces configured fields periodically and takes
//! operator commands on stdin.

mod config;
mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bsb_hub::{GatewayRuntime, TracingSink};
use bsb_protocol::demo_table;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::AppConfig;
use console::Console;

#[derive(Debug, Parser)]
#[command(name = "bsb-gateway", version, about = "Gateway to a BSB heating controller bus")]
struct Args {
    /// JSON config file
    #[arg(short, long, default_value = "bsbgateway.json")]
    config: PathBuf,

    /// Serial device, overriding the config file (`:sim` for the simulator)
    #[arg(short, long)]
    device: Option<String>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().context("cannot enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port.port_name);
    }
    Ok(())
}

async fn run(config: AppConfig) -> Result<()> {
    let table = Arc::new(demo_table());
    let gateway_config = &config.gateway;
    let adapter = &gateway_config.adapter_settings;

    let (mut runtime, sim) = if adapter.is_simulated() {
        info!("Using simulated controller");
        let (device, sim) = bsb_sim::simulated_device(table.clone(), config.simulator_options());
        (GatewayRuntime::new(device, table.clone(), gateway_config)?, Some(sim))
    } else {
        info!("Opening {} at {} baud", adapter.adapter_device, adapter.port_baud);
        let device = adapter.open_serial()?;
        (GatewayRuntime::new(device, table.clone(), gateway_config)?, None)
    };

    runtime.add_configured_loggers(gateway_config, |_| TracingSink);

    let remote = runtime.remote_client();
    if gateway_config.cmd_interface_enable {
        let (monitor_tx, monitor_rx) = mpsc::channel(64);
        runtime.set_monitor(monitor_tx);
        tokio::spawn(console::print_monitor(monitor_rx, table.clone()));
        runtime.add_source(Console::new(table.clone(), remote));
    }

    let stop = runtime.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted; shutting down");
                stop.stop();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    info!("Gateway running ({})", runtime.source_names().join(", "));
    let gateway = runtime.run().await;
    if !gateway.pending().is_empty() {
        info!("{} requests left unanswered", gateway.pending().len());
    }
    drop(gateway);

    if let Some(sim) = sim {
        if let Err(e) = sim.join().await {
            warn!("Simulated controller ended with error: {}", e);
        }
    }
    info!("Gateway stopped");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bsb_gateway=info,bsb_hub=info,bsb_protocol=info,bsb_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    if args.list_ports {
        return list_ports();
    }

    let mut config = AppConfig::load(&args.config)?;
    if let Some(device) = args.device {
        config.gateway.adapter_settings.adapter_device = device;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("cannot start async runtime")?;

    let result = runtime.block_on(run(config));
    // The console's stdin read cannot be cancelled
    runtime.shutdown_timeout(Duration::from_millis(500));

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

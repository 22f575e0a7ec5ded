//! SigmaTCP bridge daemon entry point.
//!
//! Listens for SigmaTCP clients and turns their READ, WRITE, CHECKSUM and
//! EEPROM requests into transactions on the DSP control bus.
//!
//! # Usage
//!
//! ```text
//! sigmatcp-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>    Configuration file [default: /etc/sigmatcp.toml]
//!   --bind <ADDR>      Override [network] bind_address
//!   --port <PORT>      Override [network] port
//!   --device <PATH>    Override [bus] device and select the spidev driver
//!   --simulate         Use the in-memory simulated bus
//!   --dump-config      Print the effective configuration and exit
//! ```
//!
//! Every option also reads a `SIGMATCP_*` environment variable; command-line
//! values win.  A missing config file means built-in defaults.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sigma_server::infrastructure::network::server::SigmaServer;
use sigma_server::infrastructure::storage::config::{
    load_config, render_config, BusDriverKind, ServerConfig,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// SigmaTCP to DSP control-bus bridge.
#[derive(Debug, Parser)]
#[command(
    name = "sigmatcp-server",
    about = "Bridges the SigmaTCP protocol to a SigmaDSP control bus",
    version
)]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "/etc/sigmatcp.toml", env = "SIGMATCP_CONFIG")]
    config: PathBuf,

    /// Address to listen on.
    #[arg(long, env = "SIGMATCP_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "SIGMATCP_PORT")]
    port: Option<u16>,

    /// spidev device node, e.g. `/dev/spidev0.0`.
    #[arg(long, env = "SIGMATCP_DEVICE")]
    device: Option<String>,

    /// Serve requests from an in-memory simulated DSP instead of real hardware.
    #[arg(long, env = "SIGMATCP_SIMULATE")]
    simulate: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    dump_config: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    fn apply_overrides(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.network.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(device) = &self.device {
            config.bus.device = device.clone();
            config.bus.driver = BusDriverKind::Spidev;
        }
        if self.simulate {
            config.bus.driver = BusDriverKind::Simulated;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    if cli.dump_config {
        print!("{}", render_config(&config)?);
        return Ok(());
    }

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!(
        "SigmaTCP bridge starting, bus={:?} {}",
        config.bus.driver, config.bus.device
    );

    let server = SigmaServer::from_config(&config).await?;

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    server.run(running).await?;

    info!("SigmaTCP bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

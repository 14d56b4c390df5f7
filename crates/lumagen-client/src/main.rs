//! Lumagen client entry point.
//!
//! Connects to a Radiance Pro behind an IP2SL bridge, logs every state change
//! and connection transition, and sends commands typed on stdin.
//!
//! # Usage
//!
//! ```text
//! lumagen-client [OPTIONS]
//!
//! Options:
//!   --config <PATH>          TOML config file
//!   --host <HOST>            Bridge hostname or IP (overrides the config)
//!   --port <PORT>            Bridge TCP port (overrides the config)
//!   --discover               Find the bridge by its multicast beacon
//!   --discover-timeout <S>   How long to listen for beacons [default: 30]
//! ```
//!
//! Each stdin line is a command id, optionally followed by `key=value`
//! parameters:
//!
//! ```text
//! power_on
//! input input=3
//! source_aspect_2_35
//! power_status
//! display_message text=Hello seconds=3
//! ```
//!
//! Log level comes from `RUST_LOG` (default `info`).  Ctrl+C disconnects and
//! exits.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lumagen_client::{discover_bridge, ClientConfig, LumagenClient};
use lumagen_core::CommandParams;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Command-line client for a Lumagen Radiance Pro.
#[derive(Debug, Parser)]
#[command(
    name = "lumagen-client",
    about = "Control a Lumagen Radiance Pro through a Global Caché IP2SL",
    version
)]
struct Cli {
    /// TOML configuration file.  Every setting has a default.
    #[arg(long, env = "LUMAGEN_CONFIG")]
    config: Option<PathBuf>,

    /// Bridge hostname or IP address.
    #[arg(long, env = "LUMAGEN_HOST")]
    host: Option<String>,

    /// Bridge TCP port.
    #[arg(long, env = "LUMAGEN_PORT")]
    port: Option<u16>,

    /// Discover the bridge on the LAN when no host is given.
    #[arg(long)]
    discover: bool,

    /// Seconds to listen for bridge beacons.
    #[arg(long, default_value_t = 30)]
    discover_timeout: u64,
}

impl Cli {
    /// Loads the config file (if any) and applies CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or is invalid.
    fn load_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        Ok(config)
    }
}

/// Splits `"input input=3"` into a command id and parameters.
fn parse_line(line: &str) -> Option<(&str, CommandParams)> {
    let mut tokens = line.split_whitespace();
    let id = tokens.next()?;
    let params = tokens
        .filter_map(|t| t.split_once('='))
        .fold(CommandParams::new(), |p, (k, v)| p.with(k, v));
    Some((id, params))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = cli.load_config()?;

    if config.connection.host.is_empty() && cli.discover {
        info!("searching for an IP2SL bridge");
        let found = discover_bridge(Duration::from_secs(cli.discover_timeout))
            .await
            .context("bridge discovery failed")?
            .context("no Lumagen bridge found on the network")?;
        config.connection.host = found.to_string();
    }

    let client = LumagenClient::connect(config).context("starting client")?;

    client.subscribe_state_changes(|delta| {
        info!(changes = ?delta.changes, "device state changed");
    });

    let mut link = client.watch_connection();
    tokio::spawn(async move {
        while link.changed().await.is_ok() {
            let state = *link.borrow_and_update();
            info!(%state, "connection");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("failed to listen for Ctrl+C signal: {e}");
                }
                info!("received Ctrl+C; disconnecting");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        let Some((id, params)) = parse_line(&line) else { continue };
                        let outcome = client.send_command(id, &params).await;
                        println!("{id}: {outcome}");
                    }
                    Ok(None) => {
                        info!("stdin closed; still monitoring until Ctrl+C");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("stdin read failed: {e}");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    client.disconnect().await;
    info!("Lumagen client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! zwsd - Z-Wave WebSocket server
//!
//! Runs the session server in the foreground against the simulated
//! controller network. Clients connect over WebSocket and receive a
//! `version` greeting before issuing commands.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (0.0.0.0:3000)
//! zwsd
//!
//! # Load settings from a file, overriding the port
//! zwsd --config zwsd.toml --port 3001
//!
//! # Simulate a larger network
//! zwsd --nodes 12
//! ```

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use zws_core::SimulatedDriver;
use zwsd::{ServerConfig, ZwaveServer, SERVER_VERSION};

/// Z-Wave WebSocket server
#[derive(Parser, Debug)]
#[command(name = "zwsd", version, about)]
struct Args {
    /// Path to a TOML config file (defaults to $ZWSD_CONFIG if set)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (defaults to $ZWSD_PORT if set)
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds between liveness probes
    #[arg(long)]
    ping_interval: Option<u64>,

    /// Number of simulated nodes besides the controller
    #[arg(long, default_value_t = 4)]
    nodes: u16,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let path = self
            .config
            .clone()
            .or_else(|| env::var_os("ZWSD_CONFIG").map(PathBuf::from));

        let mut config = match path {
            Some(path) => ServerConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = env::var("ZWSD_PORT").ok().filter(|p| !p.is_empty()) {
            config.port = port
                .parse()
                .with_context(|| format!("Invalid ZWSD_PORT: {port}"))?;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.ping_interval {
            config.ping_interval_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.server_config()?;

    if !run_server(config, args.nodes)? {
        process::exit(1);
    }
    Ok(())
}

/// Returns `false` when the server stopped because the driver failed.
#[tokio::main]
async fn run_server(config: ServerConfig, nodes: u16) -> Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("zwsd=info".parse()?)
                .add_directive("zws_core=info".parse()?)
                .add_directive("zws_protocol=info".parse()?),
        )
        .init();

    info!(
        version = SERVER_VERSION,
        pid = process::id(),
        "zwsd starting"
    );

    let driver = SimulatedDriver::with_nodes(nodes);
    let server = ZwaveServer::bind(&config, Arc::new(driver)).await?;
    info!(address = %server.local_addr(), nodes, "Listening");

    let shutdown_token = server.cancel_token();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let reason = server.run().await;
    if reason.is_failure() {
        error!(reason = ?reason, "zwsd stopped after a driver failure");
        return Ok(false);
    }

    info!("zwsd stopped");
    Ok(true)
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

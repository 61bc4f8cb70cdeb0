//! ts-relay binary entry point
//!
//! Usage:
//! ```bash
//! ts-relay --config relay.toml
//! ts-relay --address 0.0.0.0:1337 --sync-clients
//! ```
//!
//! Publish with a TCP peer that sends `publish/<name>[/<credential>]\n`
//! followed by the transport stream; play with `play/<name>\n` and read.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ts_relay::{api, Config, RelayServer};

/// Low-latency MPEG-TS relay
#[derive(Parser, Debug)]
#[command(name = "ts-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listen address (overrides [server] address)
    #[arg(long, short)]
    address: Option<String>,

    /// Hold new viewers back until a keyframe
    #[arg(long)]
    sync_clients: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "ts-relay failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ts_relay::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(address) = cli.address {
        config.server.address = address;
    }
    if cli.sync_clients {
        config.server.sync_clients = true;
    }

    let auth = config.auth.build()?;
    let server = RelayServer::new(config.server, config.relay, auth);
    let cancel = CancellationToken::new();

    let addrs = server.listen(cancel.clone()).await?;
    tracing::info!(listeners = addrs.len(), sync_clients = server.config().sync_clients, "Relay started");

    let api_task = if config.api.enabled {
        let listener = TcpListener::bind(&config.api.address).await?;
        let (server, cancel) = (server.clone(), cancel.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = api::serve(listener, server, cancel).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    cancel.cancel();

    if let Some(task) = api_task {
        let _ = task.await;
    }
    Ok(())
}

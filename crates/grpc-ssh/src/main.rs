//! grpc-ssh-connect binary
//!
//! Dials one address through SSH and relays local standard input/output over
//! the resulting stream, for RPC clients that talk to a helper process
//! instead of a socket.

use anyhow::{Context, Result};
use clap::Parser;
use grpc_ssh::broker::relay_half_close;
use grpc_ssh::ClientBuilder;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Relay standard input/output to a service behind an SSH host.
#[derive(Parser, Debug)]
#[command(name = "grpc-ssh-connect", version, about)]
struct Args {
    /// SSH target, `[user@]host[:port]`.
    target: String,

    /// Address (service name) passed to the remote broker.
    address: String,

    /// Authenticate through the local SSH agent.
    #[arg(long)]
    agent: bool,

    /// Use the in-process SSH client even if `ssh` is installed.
    #[arg(long)]
    embedded: bool,

    /// Connection timeout in seconds.
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Broker command on the remote host.
    #[arg(long, default_value = grpc_ssh::transport::DEFAULT_REMOTE_COMMAND)]
    remote_command: String,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let dialer = ClientBuilder::new(&args.target)?
        .with_agent(args.agent)
        .prefer_embedded(args.embedded)
        .with_connect_timeout(Duration::from_secs(args.timeout))
        .with_remote_command(args.remote_command)
        .connect()
        .await
        .with_context(|| format!("connecting to {}", args.target))?;

    let info = dialer.connection_info();
    info!(host = %info.host, transport = ?info.transport_type, "Connected");

    let cancel = CancellationToken::new();
    let dial = async {
        tokio::select! {
            stream = dialer.dial(&cancel, &args.address) => stream,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                Err(grpc_ssh::TransportError::Cancelled)
            }
        }
    };

    let outcome = match dial.await {
        Ok(mut stream) => {
            debug!(stream = %stream.id(), "Relaying");
            let relayed =
                relay_half_close(tokio::io::stdin(), tokio::io::stdout(), &mut stream).await;
            if let Err(e) = stream.close().await {
                warn!(error = %e, "Stream closed with errors");
            }
            relayed.context("relaying")
        }
        Err(e) => Err(e).with_context(|| format!("dialing {}", args.address)),
    };

    if let Err(e) = dialer.close().await {
        warn!(error = %e, "Failed to close SSH connection");
    }

    outcome
}

//! grpc-ssh-broker binary
//!
//! Runs on the SSH server, started once per dial with the session's standard
//! streams as the data channel. Logs go to standard error only.

use anyhow::{Context, Result};
use clap::Parser;
use grpc_ssh_broker::cli::{effective_args, Cli, Command, SSH_ORIGINAL_COMMAND};
use grpc_ssh_broker::{config, Broker, BrokerError, Configuration, ServiceRegistry};
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let original_command = std::env::var(SSH_ORIGINAL_COMMAND).ok();
    let args = effective_args(std::env::args().collect(), original_command.clone());
    let cli = Cli::parse_from(args);

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    debug!(version = env!("CARGO_PKG_VERSION"), "Starting broker");
    debug!(value = ?original_command, "ssh original command");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.downcast_ref::<BrokerError>().map_or(1, BrokerError::exit_code);
            error!("exit {code}: {e:#}");
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let path = config::locate(cli.config.as_deref())?;
    let configuration = Configuration::load(&path)
        .with_context(|| format!("loading services from {}", path.display()))?;
    for service in &configuration.services {
        debug!(%service, "Configured service");
    }

    let broker = Broker::new(ServiceRegistry::new(configuration));

    match cli.command {
        Command::Client {
            service,
            method_path,
        } => {
            broker
                .client(&service, &method_path, tokio::io::stdin(), tokio::io::stdout())
                .await?;
        }
    }

    Ok(())
}

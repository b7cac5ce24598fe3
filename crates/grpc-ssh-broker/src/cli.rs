//! Command line of the `grpc-ssh-broker` binary

use crate::config::CONFIG_ENV;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Environment variable set by sshd to the command a client asked for
pub const SSH_ORIGINAL_COMMAND: &str = "SSH_ORIGINAL_COMMAND";

/// Remote-side broker for gRPC over SSH.
#[derive(Parser, Debug)]
#[command(name = "grpc-ssh-broker", version, about)]
pub struct Cli {
    /// Service configuration file (YAML, or JSON by extension).
    #[arg(long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Broker operations
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Connect standard input/output to a configured service.
    Client {
        /// Service name, matched case-insensitively.
        service: String,

        /// gRPC method path selecting a method-scoped URL.
        #[arg(default_value = "")]
        method_path: String,
    },
}

/// Arguments to parse: the process arguments, or the client's requested
/// command when running as an SSH forced command.
///
/// In forced-command mode the requested command replaces everything after the
/// program name; arguments on the `command=` line itself are not used, so the
/// configuration file comes from the requested command or from the
/// environment.
pub fn effective_args(argv: Vec<String>, original_command: Option<String>) -> Vec<String> {
    match original_command.filter(|c| !c.trim().is_empty()) {
        Some(command) => argv
            .into_iter()
            .take(1)
            .chain(command.split_whitespace().skip(1).map(str::to_string))
            .collect(),
        None => argv,
    }
}

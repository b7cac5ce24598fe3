//! Broker error types

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures loading or validating the service configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("unable to open configuration at '{path}': {source}")]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },

    /// The configuration file is not valid YAML
    #[error("unable to parse configuration at '{path}': {source}")]
    Yaml {
        /// File that was parsed
        path: PathBuf,
        /// Parser error
        source: serde_yaml::Error,
    },

    /// The configuration file is not valid JSON
    #[error("unable to parse configuration at '{path}': {source}")]
    Json {
        /// File that was parsed
        path: PathBuf,
        /// Parser error
        source: serde_json::Error,
    },

    /// No configuration file exists at any of the searched locations
    #[error("no configuration found, searched: {}", format_paths(.searched))]
    NotFound {
        /// Locations that were tried, in order
        searched: Vec<PathBuf>,
    },

    /// The configuration parsed but is not usable
    #[error("invalid service '{service}': {reason}")]
    Invalid {
        /// Offending service name (may be empty)
        service: String,
        /// What is wrong with it
        reason: String,
    },
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures of the broker's upstream side
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No service with this name is configured
    #[error("no such service: '{0}'")]
    NoSuchService(String),

    /// The resolved URL cannot be dialed
    #[error("unsupported upstream URL '{url}': {reason}")]
    UnsupportedUrl {
        /// Resolved URL
        url: String,
        /// Why it cannot be used
        reason: String,
    },

    /// Connecting to the upstream failed
    #[error("unable to connect to '{address}': {source}")]
    Connect {
        /// Address that was dialed
        address: String,
        /// Underlying I/O error
        source: io::Error,
    },

    /// Relaying bytes failed
    #[error("relay failed: {0}")]
    Relay(#[from] io::Error),

    /// Configuration problems
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BrokerError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoSuchService(_) => 2,
            _ => 1,
        }
    }
}

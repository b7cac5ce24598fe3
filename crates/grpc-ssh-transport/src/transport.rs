//! Transport abstraction and connection parameters

use crate::{DuplexStream, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default name of the broker command started on the remote host
pub const DEFAULT_REMOTE_COMMAND: &str = "grpc-ssh-broker";

/// Transport backend producing one duplex stream per dial
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new stream to `address` through the remote broker
    async fn dial(
        &self,
        cancel: &CancellationToken,
        address: &str,
    ) -> Result<DuplexStream, TransportError>;

    /// Release the shared connection or control process
    async fn close(&self) -> Result<(), TransportError>;

    /// Get connection information
    fn connection_info(&self) -> ConnectionInfo;
}

/// Connection information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Remote hostname or IP
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Username, if one was resolved or configured
    pub username: Option<String>,
    /// Connection type
    pub transport_type: TransportType,
}

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// External `ssh` client with connection multiplexing
    Subprocess,
    /// In-process SSH client
    Embedded,
}

/// Remote SSH target the dialer connects to
#[derive(Debug, Clone)]
pub struct SshTarget {
    /// Username; the current OS user when unset
    pub user: Option<String>,
    /// Remote hostname or IP
    pub hostname: String,
    /// Remote port (default: 22)
    pub port: u16,
    /// Authenticate through the local SSH agent
    pub enable_agent: bool,
    /// Skip the external client and use the in-process one
    pub prefer_embedded_client: bool,
    /// Connection timeout for the in-process client
    pub connect_timeout: Duration,
    /// Broker command started on the remote side for each dial
    pub remote_command: String,
}

impl Default for SshTarget {
    fn default() -> Self {
        Self {
            user: None,
            hostname: "localhost".to_string(),
            port: 22,
            enable_agent: false,
            prefer_embedded_client: false,
            connect_timeout: Duration::from_secs(10),
            remote_command: DEFAULT_REMOTE_COMMAND.to_string(),
        }
    }
}

impl SshTarget {
    /// Create a target for `hostname` with default settings
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }

    /// Set the username
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the port; zero keeps the default
    pub fn port(mut self, port: u16) -> Self {
        if port != 0 {
            self.port = port;
        }
        self
    }

    /// Enable or disable SSH agent authentication
    pub fn enable_agent(mut self, enable: bool) -> Self {
        self.enable_agent = enable;
        self
    }

    /// Force the in-process SSH client
    pub fn prefer_embedded_client(mut self, prefer: bool) -> Self {
        self.prefer_embedded_client = prefer;
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the remote broker command
    pub fn remote_command(mut self, command: impl Into<String>) -> Self {
        self.remote_command = command.into();
        self
    }

    /// Command line executed remotely for a dial to `address`
    pub fn remote_invocation(&self, address: &str) -> String {
        format!("{} client {}", self.remote_command, address)
    }
}

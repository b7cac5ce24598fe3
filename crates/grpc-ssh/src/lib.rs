//! # gRPC over SSH
//!
//! Reach gRPC services through an SSH-authenticated channel instead of a raw
//! TCP socket.
//!
//! A [`ClientBuilder`] turns a `[user@]host[:port]` target into a
//! [`Dialer`]; each [`Dialer::dial`] runs the broker on the remote host and
//! returns a [`DuplexStream`] that any tokio-based RPC transport can use as its
//! connection. The broker side ([`broker`]) resolves the requested service to
//! an upstream URL.
//!
//! ```no_run
//! # async fn example() -> grpc_ssh::Result<()> {
//! use grpc_ssh::ClientBuilder;
//! use tokio_util::sync::CancellationToken;
//!
//! let dialer = ClientBuilder::new("deploy@example.com")?
//!     .with_agent(true)
//!     .connect()
//!     .await?;
//!
//! let stream = dialer.dial(&CancellationToken::new(), "helloworld").await?;
//! // hand `stream` to the RPC client
//! stream.close().await?;
//! dialer.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use grpc_ssh_broker as broker;
pub use grpc_ssh_transport as transport;

/// Error types for the client facade
pub mod error;

/// Client construction
pub mod client;

pub use client::{parse_target, ClientBuilder};
pub use error::GrpcSshError;
pub use grpc_ssh_broker::{Configuration, ServiceRegistry};
pub use grpc_ssh_transport::{
    CloseError, ConnectionInfo, Dialer, DuplexStream, SshTarget, TransportError, TransportType,
};

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, GrpcSshError>;

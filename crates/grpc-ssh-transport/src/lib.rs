//! # gRPC over SSH: transport
//!
//! Dialer producing bidirectional byte streams over SSH, backed either by the
//! external `ssh` client (with connection multiplexing) or by an in-process
//! SSH client.

#![warn(missing_docs)]

/// Transport abstraction and connection parameters
pub mod transport;

/// Duplex stream adapter over a pipe pair and a lifecycle
pub mod duplex;

/// Child process lifecycle
#[cfg(unix)]
pub mod process;

/// External `ssh` client backend
#[cfg(unix)]
pub mod subprocess;

/// In-process SSH client backend
#[cfg(feature = "embedded")]
pub mod embedded;

/// Backend selection
pub mod dialer;

/// SSH-specific error types
pub mod error;

pub use dialer::Dialer;
pub use duplex::{DuplexStream, Lifecycle, PipeReader, PipeWriter};
pub use error::{CloseError, TransportError};
pub use transport::{ConnectionInfo, SshTarget, Transport, TransportType, DEFAULT_REMOTE_COMMAND};

#[cfg(feature = "embedded")]
pub use embedded::EmbeddedTransport;
#[cfg(unix)]
pub use process::ProcessLifecycle;
#[cfg(unix)]
pub use subprocess::SubprocessTransport;

//! SSH transport error types

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// No external `ssh` executable could be located on the search path
    #[error("no external ssh client found: {0}")]
    ClientNotFound(String),

    /// The local SSH agent could not be reached
    #[error("SSH agent unavailable: {0}")]
    AgentUnavailable(String),

    /// Backend setup failed (temporary directory, executable discovery, ...)
    #[error("Transport setup failed: {0}")]
    Setup(String),

    /// The control master process could not be started or stopped
    #[error("SSH control master error: {0}")]
    ControlMaster(String),

    /// SSH connection error
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Opening or starting a session for a single dial failed
    #[error("SSH session error: {0}")]
    Session(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Timeout error
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The dial was cancelled before the transport was established
    #[error("Dial cancelled")]
    Cancelled,

    /// The stream or dialer has already been closed
    #[error("Resource already closed")]
    Closed,

    /// Remote command failed
    #[error("Remote command failed with exit code {code}: {message}")]
    CommandFailed {
        /// Exit code of the failed command
        code: i32,
        /// Error message
        message: String,
    },
}

impl TransportError {
    /// Whether this error only signals that an optional capability is missing.
    ///
    /// The dialer falls back to another backend on these instead of failing.
    pub fn is_capability_absent(&self) -> bool {
        matches!(self, Self::ClientNotFound(_))
    }

    /// I/O error reported by pipe operations after the stream was closed.
    pub(crate) fn closed_io() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, TransportError::Closed)
    }
}

/// Aggregate of every failure observed while tearing a resource down.
///
/// Cloning is cheap; all callers racing on the same teardown receive the
/// same set of failures.
#[derive(Debug, Clone, Default)]
pub struct CloseError {
    failures: Vec<Arc<TransportError>>,
}

impl CloseError {
    /// Record one more failure
    pub fn push(&mut self, error: impl Into<TransportError>) {
        self.failures.push(Arc::new(error.into()));
    }

    /// All recorded failures, in the order they occurred
    pub fn failures(&self) -> &[Arc<TransportError>] {
        &self.failures
    }

    /// `Ok(())` when nothing failed, otherwise `Err(self)`
    pub fn into_result(self) -> Result<(), CloseError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} close failure(s)", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseError {}

impl From<CloseError> for TransportError {
    fn from(err: CloseError) -> Self {
        Self::Io(io::Error::other(err))
    }
}

//! Error types for the client facade

use grpc_ssh_transport::{CloseError, TransportError};
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum GrpcSshError {
    /// The `[user@]host[:port]` target could not be parsed
    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget {
        /// Target as given
        target: String,
        /// What is wrong with it
        reason: String,
    },

    /// Transport-related errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Stream teardown errors
    #[error("Close error: {0}")]
    Close(#[from] CloseError),
}

impl GrpcSshError {
    /// Whether the failure happened while establishing the SSH connection
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport(
                TransportError::Setup(_)
                    | TransportError::ControlMaster(_)
                    | TransportError::Connection(_)
                    | TransportError::Authentication(_)
                    | TransportError::Timeout(_)
            )
        )
    }
}

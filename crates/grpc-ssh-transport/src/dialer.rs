//! Backend selection and the dial entry point

#[cfg(feature = "embedded")]
use crate::embedded::EmbeddedTransport;
#[cfg(unix)]
use crate::subprocess::{locate_ssh_client, SubprocessTransport};
use crate::transport::{ConnectionInfo, Transport};
use crate::{DuplexStream, SshTarget, TransportError};
#[cfg(unix)]
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Backend chosen when the dialer was constructed
enum Backend {
    #[cfg(unix)]
    Subprocess(SubprocessTransport),
    #[cfg(feature = "embedded")]
    Embedded(EmbeddedTransport),
}

impl Backend {
    fn transport(&self) -> &dyn Transport {
        match self {
            #[cfg(unix)]
            Self::Subprocess(t) => t,
            #[cfg(feature = "embedded")]
            Self::Embedded(t) => t,
        }
    }
}

/// Produces SSH-backed streams to one remote target.
///
/// The backend is chosen once by [`Dialer::connect`]: the external `ssh`
/// client with a multiplexing control master when it is installed, the
/// in-process client otherwise or when
/// [`SshTarget::prefer_embedded_client`] is set. Every dial then reuses the
/// backend's single authenticated connection.
pub struct Dialer {
    backend: Backend,
}

impl Dialer {
    /// Select and set up a backend for `target`
    pub async fn connect(target: SshTarget) -> Result<Self, TransportError> {
        #[cfg(unix)]
        {
            let lookup = if target.prefer_embedded_client {
                Err(TransportError::ClientNotFound(
                    "in-process client requested".to_string(),
                ))
            } else {
                locate_ssh_client()
            };
            Self::connect_using(target, lookup).await
        }

        #[cfg(not(unix))]
        {
            Self::connect_embedded(target).await
        }
    }

    /// Set up a backend given the outcome of locating the `ssh` executable
    #[cfg(unix)]
    pub(crate) async fn connect_using(
        target: SshTarget,
        ssh_client: Result<PathBuf, TransportError>,
    ) -> Result<Self, TransportError> {
        match ssh_client {
            Ok(ssh_path) if !target.prefer_embedded_client => {
                debug!(ssh = %ssh_path.display(), "Using external ssh client");
                let transport = SubprocessTransport::connect_with_client(target, ssh_path).await?;
                Ok(Self::ready(Backend::Subprocess(transport)))
            }
            Ok(_) => Self::connect_embedded(target).await,
            Err(e) if e.is_capability_absent() => {
                if !target.prefer_embedded_client {
                    info!(reason = %e, "External ssh client unavailable, using in-process client");
                }
                Self::connect_embedded(target).await
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(feature = "embedded")]
    async fn connect_embedded(target: SshTarget) -> Result<Self, TransportError> {
        let transport = EmbeddedTransport::connect(target).await?;
        Ok(Self::ready(Backend::Embedded(transport)))
    }

    #[cfg(not(feature = "embedded"))]
    async fn connect_embedded(_target: SshTarget) -> Result<Self, TransportError> {
        Err(TransportError::ClientNotFound(
            "no external ssh client and the in-process client is not compiled in".to_string(),
        ))
    }

    fn ready(backend: Backend) -> Self {
        let info = backend.transport().connection_info();
        info!(
            host = %info.host,
            port = info.port,
            transport = ?info.transport_type,
            "SSH dialer ready"
        );
        Self { backend }
    }

    /// Open a new stream to `address`.
    ///
    /// Cancelling `cancel` only prevents new work from starting; a stream that
    /// was already returned stays open until it is closed or its process or
    /// session exits.
    pub async fn dial(
        &self,
        cancel: &CancellationToken,
        address: &str,
    ) -> Result<DuplexStream, TransportError> {
        self.backend.transport().dial(cancel, address).await
    }

    /// Release the backend's shared connection or control master
    pub async fn close(&self) -> Result<(), TransportError> {
        self.backend.transport().close().await
    }

    /// Connection details, for logging
    pub fn connection_info(&self) -> ConnectionInfo {
        self.backend.transport().connection_info()
    }
}

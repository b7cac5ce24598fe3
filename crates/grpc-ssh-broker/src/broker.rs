//! The `client` operation: resolve, connect and relay

use crate::error::BrokerError;
use crate::registry::ServiceRegistry;
use crate::relay::{relay, Upstream};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// Bridges SSH session streams to configured upstream services
#[derive(Debug, Clone)]
pub struct Broker {
    registry: ServiceRegistry,
}

impl Broker {
    /// Create a broker over `registry`
    pub fn new(registry: ServiceRegistry) -> Self {
        Self { registry }
    }

    /// The service registry
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Connect `input`/`output` to the upstream of `service`.
    ///
    /// Returns once either direction of the relay has finished.
    pub async fn client<R, W>(
        &self,
        service: &str,
        method_path: &str,
        input: R,
        output: W,
    ) -> Result<(), BrokerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let route = self
            .registry
            .resolve(service, method_path)
            .ok_or_else(|| BrokerError::NoSuchService(service.to_string()))?;

        info!(service = %route.service, path = method_path, url = %route.url, "Routing client");

        let upstream = Upstream::from_route(&route)?.connect().await?;
        relay(input, output, upstream).await
    }
}

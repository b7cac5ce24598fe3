//! Upstream connection and byte relay

use crate::cache::Route;
use crate::error::BrokerError;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use url::Url;

/// Bidirectional upstream connection
pub trait UpstreamIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> UpstreamIo for T {}

/// Where the broker connects for a resolved route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream {
    /// `host:port` over TCP
    Tcp(String),
    /// Unix domain socket path
    Unix(PathBuf),
}

impl Upstream {
    /// Map a resolved route to a connectable address.
    ///
    /// `https` upstreams are reached in plain text when the route's TLS
    /// settings say the SSH transport already provides encryption; a TLS
    /// client is not built into the broker.
    pub fn from_route(route: &Route) -> Result<Self, BrokerError> {
        let unsupported = |reason: &str| BrokerError::UnsupportedUrl {
            url: route.url.clone(),
            reason: reason.to_string(),
        };

        let parsed = Url::parse(&route.url).map_err(|e| unsupported(&e.to_string()))?;
        let scheme = parsed.scheme().to_ascii_lowercase();

        match scheme.as_str() {
            "http" | "https" => {
                if scheme == "https" && !route.tls.as_ref().is_some_and(|t| t.from_remote) {
                    return Err(unsupported("TLS upstreams require tls.from_remote"));
                }
                let host = parsed.host_str().ok_or_else(|| unsupported("missing host"))?;
                let port = parsed
                    .port_or_known_default()
                    .ok_or_else(|| unsupported("missing port"))?;
                Ok(Self::Tcp(format!("{host}:{port}")))
            }
            "unix" => {
                // unix://relative.sock or unix:///absolute.sock
                let path = match parsed.host_str() {
                    Some(host) if !host.is_empty() => format!("{host}{}", parsed.path()),
                    _ => parsed.path().to_string(),
                };
                if path.is_empty() {
                    return Err(unsupported("missing socket path"));
                }
                Ok(Self::Unix(PathBuf::from(path)))
            }
            other => Err(unsupported(&format!("unsupported protocol: '{other}'"))),
        }
    }

    /// Open the connection
    pub async fn connect(&self) -> Result<Box<dyn UpstreamIo>, BrokerError> {
        match self {
            Self::Tcp(address) => {
                debug!(address = %address, protocol = "tcp", "Connecting");
                let stream = tokio::net::TcpStream::connect(address.as_str())
                    .await
                    .map_err(|source| BrokerError::Connect {
                        address: address.clone(),
                        source,
                    })?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Self::Unix(path) => {
                debug!(address = %path.display(), protocol = "unix", "Connecting");
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(|source| BrokerError::Connect {
                        address: path.display().to_string(),
                        source,
                    })?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            Self::Unix(path) => Err(BrokerError::UnsupportedUrl {
                url: path.display().to_string(),
                reason: "unix sockets are not available on this platform".to_string(),
            }),
        }
    }
}

/// Copy `input` to `upstream` and `upstream` to `output` until either
/// direction finishes.
pub async fn relay<R, W, U>(mut input: R, mut output: W, upstream: U) -> Result<(), BrokerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut up_read, mut up_write) = tokio::io::split(upstream);

    tokio::select! {
        sent = tokio::io::copy(&mut input, &mut up_write) => {
            let sent = sent?;
            debug!(bytes = sent, "Local input finished");
        }
        received = tokio::io::copy(&mut up_read, &mut output) => {
            let received = received?;
            debug!(bytes = received, "Upstream finished");
        }
    }

    Ok(())
}

/// Like [`relay`], but the end of local input only half-closes the upstream.
///
/// Once `input` is exhausted the upstream's write side is shut down and
/// upstream output keeps flowing to `output` until the upstream ends. A
/// one-shot request piped into a helper process therefore still gets its
/// reply.
pub async fn relay_half_close<R, W, U>(
    mut input: R,
    mut output: W,
    upstream: U,
) -> Result<(), BrokerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut up_read, mut up_write) = tokio::io::split(upstream);

    {
        let send = async {
            let sent = tokio::io::copy(&mut input, &mut up_write).await?;
            up_write.shutdown().await?;
            debug!(bytes = sent, "Local input finished, upstream write side shut down");
            Ok::<_, std::io::Error>(())
        };
        let receive = tokio::io::copy(&mut up_read, &mut output);
        tokio::pin!(send, receive);

        let mut sending = true;
        loop {
            tokio::select! {
                sent = &mut send, if sending => {
                    sent?;
                    sending = false;
                }
                received = &mut receive => {
                    let received = received?;
                    debug!(bytes = received, "Upstream finished");
                    break;
                }
            }
        }
    }

    output.flush().await?;
    Ok(())
}

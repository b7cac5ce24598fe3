//! Client construction from a `[user@]host[:port]` target

use crate::{GrpcSshError, Result};
use grpc_ssh_transport::{Dialer, SshTarget};
use std::time::Duration;
use tracing::debug;

/// Builder for a [`Dialer`] to one SSH target
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    target: SshTarget,
}

impl ClientBuilder {
    /// Create a builder from `[user@]host[:port]`
    pub fn new(target: &str) -> Result<Self> {
        let target = parse_target(target)?;
        Ok(Self { target })
    }

    /// Create a builder from already assembled parameters
    pub fn from_target(target: SshTarget) -> Self {
        Self { target }
    }

    /// Authenticate through the local SSH agent
    pub fn with_agent(mut self, enable: bool) -> Self {
        self.target = self.target.enable_agent(enable);
        self
    }

    /// Use the in-process SSH client even if `ssh` is installed
    pub fn prefer_embedded(mut self, prefer: bool) -> Self {
        self.target = self.target.prefer_embedded_client(prefer);
        self
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.target = self.target.connect_timeout(timeout);
        self
    }

    /// Set the broker command run on the remote host
    pub fn with_remote_command(mut self, command: impl Into<String>) -> Self {
        self.target = self.target.remote_command(command);
        self
    }

    /// Connection parameters assembled so far
    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    /// Connect and return a dialer ready for [`Dialer::dial`]
    pub async fn connect(self) -> Result<Dialer> {
        debug!(host = %self.target.hostname, port = self.target.port, "Connecting");
        Ok(Dialer::connect(self.target).await?)
    }
}

/// Parse `[user@]host[:port]`; IPv6 hosts with a port use `[addr]:port`
pub fn parse_target(raw: &str) -> Result<SshTarget> {
    let invalid = |reason: &str| GrpcSshError::InvalidTarget {
        target: raw.to_string(),
        reason: reason.to_string(),
    };

    let (user, rest) = match raw.rsplit_once('@') {
        Some(("", _)) => return Err(invalid("empty user")),
        Some((user, rest)) => (Some(user), rest),
        None => (None, raw),
    };

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| invalid("unterminated '['"))?;
        match after {
            "" => (host, None),
            _ => {
                let port = after
                    .strip_prefix(':')
                    .ok_or_else(|| invalid("unexpected text after ']'"))?;
                (host, Some(port))
            }
        }
    } else if rest.matches(':').count() == 1 {
        let (host, port) = rest.split_once(':').ok_or_else(|| invalid("malformed port"))?;
        (host, Some(port))
    } else {
        // No port, or a bare IPv6 address
        (rest, None)
    };

    if host.is_empty() {
        return Err(invalid("empty host"));
    }

    let mut target = SshTarget::new(host);
    if let Some(user) = user {
        target = target.user(user);
    }
    if let Some(port) = port {
        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
        if port == 0 {
            return Err(invalid("invalid port"));
        }
        target = target.port(port);
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_host_only() {
        let target = parse_target("example.com").unwrap();
        assert_eq!(target.hostname, "example.com");
        assert_eq!(target.port, 22);
        assert_eq!(target.user, None);
    }

    #[test]
    fn test_user_host_port() {
        let target = parse_target("deploy@example.com:2222").unwrap();
        assert_eq!(target.user.as_deref(), Some("deploy"));
        assert_eq!(target.hostname, "example.com");
        assert_eq!(target.port, 2222);
    }

    #[test]
    fn test_ipv6() {
        let bare = parse_target("::1").unwrap();
        assert_eq!(bare.hostname, "::1");
        assert_eq!(bare.port, 22);

        let bracketed = parse_target("root@[fe80::1]:2200").unwrap();
        assert_eq!(bracketed.hostname, "fe80::1");
        assert_eq!(bracketed.port, 2200);
        assert_eq!(bracketed.user.as_deref(), Some("root"));

        let no_port = parse_target("[fe80::1]").unwrap();
        assert_eq!(no_port.hostname, "fe80::1");
        assert_eq!(no_port.port, 22);
    }

    #[test]
    fn test_invalid_targets() {
        for raw in ["", "@host", "user@", "host:", "host:abc", "host:0", "host:70000", "[::1", "[::1]x"] {
            assert!(
                matches!(parse_target(raw), Err(GrpcSshError::InvalidTarget { .. })),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn test_builder_options() {
        let builder = ClientBuilder::new("deploy@example.com")
            .unwrap()
            .with_agent(true)
            .prefer_embedded(true)
            .with_connect_timeout(Duration::from_secs(3))
            .with_remote_command("/opt/grpc-ssh-broker");

        let target = builder.target();
        assert!(target.enable_agent);
        assert!(target.prefer_embedded_client);
        assert_eq!(target.connect_timeout, Duration::from_secs(3));
        assert_eq!(target.remote_command, "/opt/grpc-ssh-broker");
    }

    proptest! {
        #[test]
        fn prop_parse_round_trips(
            user in proptest::option::of("[a-z][a-z0-9_-]{0,8}"),
            host in "[a-z][a-z0-9-]{0,12}(\\.[a-z]{2,4})?",
            port in proptest::option::of(1u16..),
        ) {
            let mut raw = String::new();
            if let Some(user) = &user {
                raw.push_str(user);
                raw.push('@');
            }
            raw.push_str(&host);
            if let Some(port) = port {
                raw.push_str(&format!(":{port}"));
            }

            let target = parse_target(&raw).unwrap();
            prop_assert_eq!(target.user, user);
            prop_assert_eq!(target.hostname, host);
            prop_assert_eq!(target.port, port.unwrap_or(22));
        }
    }
}

//! # gRPC over SSH: broker
//!
//! Remote-side companion of the SSH dialer: resolves a logical service name
//! (and optional gRPC method path) to an upstream URL and relays the SSH
//! session's standard streams to it.

#![warn(missing_docs)]

/// Service configuration model and loader
pub mod config;

/// Resolution cache
pub mod cache;

/// Service lookup
pub mod registry;

/// Upstream connection and byte relay
pub mod relay;

/// The client operation
pub mod broker;

/// Command line
pub mod cli;

/// Broker error types
pub mod error;

pub use broker::Broker;
pub use cache::{ResolutionCache, Route};
pub use config::{Configuration, Service, ServiceUrl, TlsConfig};
pub use error::{BrokerError, ConfigError};
pub use registry::ServiceRegistry;
pub use relay::{relay, relay_half_close, Upstream};

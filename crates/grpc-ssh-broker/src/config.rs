//! Service configuration model and loader

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "GRPC_SSH_BROKER_CONFIG";

/// System-wide configuration location
pub const SYSTEM_CONFIG_PATH: &str = "/etc/grpc-ssh-broker/services.yaml";

/// Configuration location relative to the working directory
pub const LOCAL_CONFIG_PATH: &str = "./grpc-ssh-broker.services.yaml";

/// URL schemes the broker can connect to
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "unix"];

/// Multi-valued metadata map (headers or trailers)
pub type Metadata = BTreeMap<String, Vec<String>>;

/// Top-level broker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Services in precedence order
    #[serde(default)]
    pub services: Vec<Service>,
}

/// A named backend reachable through the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Service name, matched case-insensitively
    pub name: String,

    /// URL used when no method-scoped entry applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Method-scoped URLs, checked before `url`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<ServiceUrl>,

    /// TLS settings for `url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    /// Headers passed through with requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub header: Metadata,

    /// Trailers passed through with responses
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub trailer: Metadata,
}

/// URL applying to a fixed set of method paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceUrl {
    /// Target URL
    pub url: String,

    /// Method paths (e.g. `/pkg.Greeter`) routed to this URL
    #[serde(default, alias = "methods")]
    pub method_paths: BTreeSet<String>,

    /// TLS settings for this URL; the service's settings when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    /// Headers passed through with requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub header: Metadata,

    /// Trailers passed through with responses
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub trailer: Metadata,
}

/// TLS parameters for an upstream.
///
/// Carried through opaquely; only `from_remote` influences how the broker
/// connects.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// The SSH transport already encrypts the stream; connect in plain text
    #[serde(default)]
    pub from_remote: bool,
    /// CA certificate path
    #[serde(default)]
    pub ca: String,
    /// Client certificate path
    #[serde(default)]
    pub certificate: String,
    /// Client key path
    #[serde(default)]
    pub key: String,
    /// Skip server certificate verification
    #[serde(default)]
    pub skip_verify: bool,
}

impl fmt::Display for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TlsConfig(sensitive, skipVerify={})", self.skip_verify)
    }
}

// Paths are sensitive too, keep them out of debug output
impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("from_remote", &self.from_remote)
            .field("skip_verify", &self.skip_verify)
            .finish_non_exhaustive()
    }
}

fn write_metadata(f: &mut fmt::Formatter<'_>, label: &str, map: &Metadata) -> fmt::Result {
    if map.is_empty() {
        return Ok(());
    }
    let entries: Vec<String> = map.iter().map(|(k, v)| format!("{k}={}", v.len())).collect();
    write!(f, ", {label}=[{}]", entries.join(", "))
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service(name={}, to=", self.name)?;
        match (&self.url, self.urls.first()) {
            (Some(url), _) => f.write_str(url)?,
            (None, Some(scoped)) => f.write_str(&scoped.url)?,
            (None, None) => f.write_str("-")?,
        }
        if !self.urls.is_empty() {
            write!(f, ", scoped={}", self.urls.len())?;
        }
        if let Some(tls) = &self.tls {
            write!(f, ", tls={tls}")?;
        }
        write_metadata(f, "header", &self.header)?;
        write_metadata(f, "trailer", &self.trailer)?;
        f.write_str(")")
    }
}

impl Service {
    /// Whether `name` refers to this service
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.name.to_lowercase() == name.to_lowercase()
    }

    /// First method-scoped entry listing `method_path`
    pub fn scoped_url(&self, method_path: &str) -> Option<&ServiceUrl> {
        self.urls.iter().find(|u| u.method_paths.contains(method_path))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            service: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if self.url.is_none() && self.urls.is_empty() {
            return Err(invalid("no url configured".to_string()));
        }
        if let Some(url) = &self.url {
            check_url(url).map_err(invalid)?;
        }
        for scoped in &self.urls {
            check_url(&scoped.url).map_err(invalid)?;
            if scoped.method_paths.is_empty() {
                return Err(invalid(format!("url '{}' lists no method paths", scoped.url)));
            }
        }
        Ok(())
    }
}

fn check_url(raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("invalid url '{raw}': {e}"))?;
    if SUPPORTED_SCHEMES.contains(&parsed.scheme()) {
        Ok(())
    } else {
        Err(format!("unsupported protocol '{}' in '{raw}'", parsed.scheme()))
    }
}

impl Configuration {
    /// Parse a YAML document and validate it
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw).map_err(|source| ConfigError::Yaml {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the configuration at `path`.
    ///
    /// Files ending in `.json` are parsed as JSON, anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config: Self = if is_json {
            serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?
        };

        config.validate()?;
        debug!(path = %path.display(), services = config.services.len(), "Configuration loaded");
        Ok(config)
    }

    /// Check every service; duplicate names are only warned about
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for service in &self.services {
            service.validate()?;
            if !seen.insert(service.name.to_lowercase()) {
                warn!(service = %service.name, "Duplicate service name, only the first entry is used");
            }
        }
        Ok(())
    }
}

/// Pick the configuration file: `explicit` if given, else the first existing
/// default location.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let defaults = [PathBuf::from(SYSTEM_CONFIG_PATH), PathBuf::from(LOCAL_CONFIG_PATH)];
    locate_in(explicit, &defaults)
}

fn locate_in(explicit: Option<&Path>, defaults: &[PathBuf]) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    defaults
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| ConfigError::NotFound {
            searched: defaults.to_vec(),
        })
}

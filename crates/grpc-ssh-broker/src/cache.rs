//! Memoization of service resolutions

use crate::config::TlsConfig;
use dashmap::DashMap;
use std::sync::Arc;

/// Result of resolving a service, shared between cache and callers
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Name of the matched service as configured
    pub service: String,
    /// Upstream URL
    pub url: String,
    /// TLS settings applying to `url`
    pub tls: Option<TlsConfig>,
}

/// Cache key: lookup name plus method path, empty for the default route
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    service: String,
    method_path: String,
}

impl CacheKey {
    fn new(service: &str, method_path: &str) -> Self {
        Self {
            service: service.to_string(),
            method_path: method_path.to_string(),
        }
    }
}

/// Concurrent, write-once cache of successful resolutions.
///
/// Constructed separately from the registry and shared by reference so that
/// copies of the configuration never carry their own cache.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: DashMap<CacheKey, Arc<Route>>,
}

impl ResolutionCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached route for `(service, method_path)`
    pub fn get(&self, service: &str, method_path: &str) -> Option<Arc<Route>> {
        self.entries
            .get(&CacheKey::new(service, method_path))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Store `route` unless the key is already present.
    ///
    /// Returns the route that ends up cached; a concurrent writer that lost the
    /// race gets the winner's value.
    pub fn insert(&self, service: &str, method_path: &str, route: Route) -> Arc<Route> {
        let entry = self
            .entries
            .entry(CacheKey::new(service, method_path))
            .or_insert_with(|| Arc::new(route));
        Arc::clone(entry.value())
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

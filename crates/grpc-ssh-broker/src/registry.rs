//! Service lookup by name and method path

use crate::cache::{ResolutionCache, Route};
use crate::config::{Configuration, Service};
use std::sync::Arc;
use tracing::debug;

/// Immutable list of services plus a shared resolution cache.
///
/// Method-scoped URLs take precedence over a service's default URL. When
/// several services share a name (case-insensitively) the first one listed
/// wins. Only successful resolutions are cached; a miss is recomputed every
/// time.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Arc<[Service]>,
    cache: Arc<ResolutionCache>,
}

impl ServiceRegistry {
    /// Build a registry with a fresh cache
    pub fn new(config: Configuration) -> Self {
        Self::with_cache(config, Arc::new(ResolutionCache::new()))
    }

    /// Build a registry around an existing cache
    pub fn with_cache(config: Configuration, cache: Arc<ResolutionCache>) -> Self {
        Self {
            services: config.services.into(),
            cache,
        }
    }

    /// Configured services, in precedence order
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// The resolution cache
    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// First service whose name matches `name` case-insensitively
    pub fn find(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.matches(name))
    }

    /// Resolve `service` (and optionally `method_path`) to an upstream route.
    ///
    /// An empty `method_path` selects the service's default URL.
    pub fn resolve(&self, service: &str, method_path: &str) -> Option<Arc<Route>> {
        if !method_path.is_empty() {
            if let Some(route) = self.cache.get(service, method_path) {
                return Some(route);
            }
        }
        if let Some(route) = self.cache.get(service, "") {
            return Some(route);
        }

        let Some(found) = self.find(service) else {
            debug!(service, "No such service");
            return None;
        };

        if !method_path.is_empty() {
            if let Some(scoped) = found.scoped_url(method_path) {
                let route = Route {
                    service: found.name.clone(),
                    url: scoped.url.clone(),
                    tls: scoped.tls.clone().or_else(|| found.tls.clone()),
                };
                debug!(service, path = method_path, url = %route.url, "Resolved method-scoped url");
                return Some(self.cache.insert(service, method_path, route));
            }
        }

        let url = found.url.clone()?;
        let route = Route {
            service: found.name.clone(),
            url,
            tls: found.tls.clone(),
        };
        debug!(service, url = %route.url, "Resolved default url");
        Some(self.cache.insert(service, "", route))
    }

    /// URL-only form of [`ServiceRegistry::resolve`]
    pub fn resolve_url(&self, service: &str, method_path: &str) -> Option<String> {
        self.resolve(service, method_path).map(|route| route.url.clone())
    }
}

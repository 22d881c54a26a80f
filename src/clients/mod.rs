//! Backend clients and the provider registry.
//!
//! A provider is the kind of behavior a backend implements. Each provider name
//! maps to a constructor in [`ProviderRegistry`]; the set is closed and built
//! once at startup. Clients are constructed before route registration and looked
//! up by backend name while routes are wired.

pub mod alb;
pub mod load_balancer;
pub mod proxy;

use crate::cache::{Cache, CacheCollection};
use crate::config::{BackendOptions, PathTable};
use crate::handler::Handler;
use crate::routes::error::RouteError;
use crate::routes::table::RouterHandle;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub use alb::AlbClient;
pub use load_balancer::LoadBalancer;
pub use proxy::ProxyClient;

/// Constructed clients by backend name
pub type ClientCollection = BTreeMap<String, Arc<dyn BackendClient>>;

/// Named handlers exposed by a client
pub type HandlerTable = HashMap<String, Handler>;

/// Capabilities every backend client offers to route registration
pub trait BackendClient: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Which provider built this client
    fn provider_kind(&self) -> ProviderKind;

    /// The options this client was built from
    fn configuration(&self) -> &BackendOptions;

    /// Built-in paths, before configured overrides are layered on
    fn default_path_configs(&self, options: &BackendOptions) -> PathTable;

    /// Handlers by name; paths refer to these through their `handler` field
    fn handlers(&self) -> HandlerTable;

    /// Local router used for nested dispatch
    fn router(&self) -> RouterHandle;

    fn set_cache(&self, cache: Option<Arc<Cache>>);

    fn cache(&self) -> Option<Arc<Cache>>;

    fn http_client(&self) -> &HttpClientHandle;
}

/// The closed set of provider behaviors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    ReverseProxy,
    ReverseProxyCache,
    LoadBalancer,
}

impl ProviderKind {
    /// Providers that never need a cache
    pub fn is_no_cache(self) -> bool {
        !matches!(self, ProviderKind::ReverseProxyCache)
    }
}

/// Arguments handed to a provider constructor
pub struct ClientArgs<'a> {
    pub name: &'a str,
    pub options: &'a BackendOptions,
    pub router: RouterHandle,
    pub cache: Option<Arc<Cache>>,
    pub siblings: &'a ClientCollection,
    pub registry: &'a ProviderRegistry,
}

pub type Constructor = fn(ClientArgs<'_>) -> Result<Arc<dyn BackendClient>, RouteError>;

#[derive(Clone, Copy)]
struct ProviderEntry {
    kind: ProviderKind,
    constructor: Constructor,
}

/// Provider name to constructor
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, ProviderEntry>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let mut providers = HashMap::new();
        let reverse_proxy = ProviderEntry {
            kind: ProviderKind::ReverseProxy,
            constructor: proxy::new_reverse_proxy,
        };
        let reverse_proxy_cache = ProviderEntry {
            kind: ProviderKind::ReverseProxyCache,
            constructor: proxy::new_reverse_proxy_cache,
        };
        let alb = ProviderEntry {
            kind: ProviderKind::LoadBalancer,
            constructor: alb::new_alb,
        };
        providers.insert("reverseproxy", reverse_proxy);
        providers.insert("rp", reverse_proxy);
        providers.insert("reverseproxycache", reverse_proxy_cache);
        providers.insert("rpc", reverse_proxy_cache);
        providers.insert("alb", alb);
        Self { providers }
    }

    fn entry(&self, provider: &str) -> Option<&ProviderEntry> {
        self.providers.get(provider.trim().to_ascii_lowercase().as_str())
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.entry(provider).is_some()
    }

    pub fn kind(&self, provider: &str) -> Option<ProviderKind> {
        self.entry(provider).map(|e| e.kind)
    }

    /// Names of every provider in the no-cache class
    pub fn no_cache_providers(&self) -> HashSet<String> {
        self.providers
            .iter()
            .filter(|(_, entry)| entry.kind.is_no_cache())
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Construct a client through the provider named in `args.options`
    pub fn construct(&self, args: ClientArgs<'_>) -> Result<Arc<dyn BackendClient>, RouteError> {
        let entry = self
            .entry(&args.options.provider)
            .ok_or_else(|| RouteError::UnknownProvider {
                backend: args.name.to_string(),
                provider: args.options.provider.clone(),
            })?;
        (entry.constructor)(args)
    }
}

/// Upstream connection settings computed from backend options
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpClientSettings {
    pub origin_url: String,
    pub timeout_ms: u64,
    pub max_idle_conns: usize,
}

/// Pooled upstream HTTP client of one backend
#[derive(Debug, Clone)]
pub struct HttpClientHandle {
    client: reqwest::Client,
    settings: HttpClientSettings,
}

impl HttpClientHandle {
    pub fn new(options: &BackendOptions) -> Result<Self, RouteError> {
        let origin_url = options.origin_url.trim_end_matches('/').to_string();
        if !origin_url.is_empty() {
            reqwest::Url::parse(&origin_url).map_err(|e| {
                RouteError::InvalidConfig(format!(
                    "backend {} has an invalid origin_url [{}]: {}",
                    options.name, options.origin_url, e
                ))
            })?;
        }

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(options.max_idle_conns)
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()
            .map_err(|e| RouteError::Provider {
                backend: options.name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            settings: HttpClientSettings {
                origin_url,
                timeout_ms: options.timeout_ms,
                max_idle_conns: options.max_idle_conns,
            },
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn settings(&self) -> &HttpClientSettings {
        &self.settings
    }
}

/// Build every backend client: plain providers first, then load balancers,
/// which need their pool members to exist already
pub fn build_clients(
    backends: &BTreeMap<String, BackendOptions>,
    caches: &CacheCollection,
    registry: &ProviderRegistry,
) -> Result<ClientCollection, RouteError> {
    let mut clients = ClientCollection::new();

    for pass in [false, true] {
        for (name, options) in backends {
            let kind = registry
                .kind(&options.provider)
                .ok_or_else(|| RouteError::UnknownProvider {
                    backend: name.clone(),
                    provider: options.provider.clone(),
                })?;
            if (kind == ProviderKind::LoadBalancer) != pass {
                continue;
            }

            let cache = if kind.is_no_cache() {
                None
            } else {
                caches.get(&options.cache_name).cloned()
            };
            let client = registry.construct(ClientArgs {
                name,
                options,
                router: RouterHandle::new(),
                cache,
                siblings: &clients,
                registry,
            })?;
            debug!(backend = %name, provider = %options.provider, "Built backend client");
            clients.insert(name.clone(), client);
        }
    }

    info!(count = clients.len(), "Initialized backend clients");
    Ok(clients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;

    #[test]
    fn test_registry_lookup() {
        let registry = ProviderRegistry::new();
        assert!(registry.contains("rp"));
        assert!(registry.contains("ReverseProxyCache"));
        assert!(!registry.contains("foo"));
        assert_eq!(registry.kind("alb"), Some(ProviderKind::LoadBalancer));
    }

    #[test]
    fn test_no_cache_providers() {
        let registry = ProviderRegistry::new();
        let no_cache = registry.no_cache_providers();
        assert!(no_cache.contains("rp"));
        assert!(no_cache.contains("reverseproxy"));
        assert!(no_cache.contains("alb"));
        assert!(!no_cache.contains("rpc"));
    }

    #[test]
    fn test_http_client_settings() {
        let mut options = BackendOptions::new("api", "rp");
        options.origin_url = "http://upstream:9090/".to_string();
        options.timeout_ms = 5_000;

        let handle = HttpClientHandle::new(&options).unwrap();
        assert_eq!(handle.settings().origin_url, "http://upstream:9090");
        assert_eq!(handle.settings().timeout_ms, 5_000);
    }

    #[test]
    fn test_http_client_rejects_bad_origin() {
        let mut options = BackendOptions::new("api", "rp");
        options.origin_url = "not a url".to_string();
        assert!(matches!(
            HttpClientHandle::new(&options),
            Err(RouteError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_build_clients_two_passes() {
        let mut backends = BTreeMap::new();
        let mut lb = BackendOptions::new("a-lb", "alb");
        lb.alb = Some(crate::config::AlbOptions {
            mechanism: Default::default(),
            pool: vec!["z-proxy".to_string()],
        });
        backends.insert("a-lb".to_string(), lb);
        backends.insert("z-proxy".to_string(), BackendOptions::new("z-proxy", "rp"));

        let clients =
            build_clients(&backends, &CacheCollection::new(), &ProviderRegistry::new()).unwrap();
        assert_eq!(clients.len(), 2);
        assert_eq!(
            clients["a-lb"].provider_kind(),
            ProviderKind::LoadBalancer
        );
    }

    #[test]
    fn test_build_clients_unknown_provider() {
        let mut backends = BTreeMap::new();
        backends.insert("test".to_string(), BackendOptions::new("test", "foo"));
        let err = build_clients(&backends, &CacheCollection::new(), &ProviderRegistry::new())
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "unknown backend provider in backend options. backendName: test, backendProvider: foo"
        );
    }

    #[test]
    fn test_build_clients_attaches_cache() {
        let mut caches = CacheCollection::new();
        caches.insert(
            "default".to_string(),
            Arc::new(Cache::new("default", CacheOptions::default())),
        );
        let mut backends = BTreeMap::new();
        backends.insert("api".to_string(), BackendOptions::new("api", "rpc"));

        let clients = build_clients(&backends, &caches, &ProviderRegistry::new()).unwrap();
        assert_eq!(clients["api"].cache().unwrap().name(), "default");
    }
}

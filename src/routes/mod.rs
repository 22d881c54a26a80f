//! Route registration.
//!
//! [`register_all`] walks the configured backends in key order, picks the
//! default backend, and wires every backend's paths into the router surfaces
//! through [`chain::build_chain`].

pub mod chain;
pub mod error;
pub mod table;

use axum::http::Method;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::{build_authenticators, AuthenticatorCollection};
use crate::cache::{build_caches, Cache, CacheCollection};
use crate::clients::{
    build_clients, BackendClient, ClientArgs, ClientCollection, HttpClientSettings,
    ProviderRegistry,
};
use crate::config::{BackendOptions, Config, MatchType, PathConfig, PathTable};
use crate::handler::Handler;
use crate::middleware::create_resources_middleware;
use crate::rewriter::{build_rewriters, RewriterCollection};
use crate::tracer::{build_tracers, TracerCollection};

pub use chain::{build_chain, ChainContext};
pub use error::RouteError;
pub use table::{strip_path_prefix, RouteInfo, RouterHandle};

/// Name a backend is promoted from when nothing is flagged default
pub const DEFAULT_BACKEND_NAME: &str = "default";

/// Name of the client handler served on the health routes
pub const HEALTH_HANDLER: &str = "health";

/// The router surfaces routes are registered on
#[derive(Clone, Default)]
pub struct RouteSurfaces {
    /// Main proxy listener
    pub frontend: RouterHandle,
    /// Management listener; `None` when metrics are disabled
    pub metrics: Option<RouterHandle>,
}

impl RouteSurfaces {
    pub fn new(config: &Config) -> Self {
        Self {
            frontend: RouterHandle::new(),
            metrics: config.metrics.enabled.then(RouterHandle::new),
        }
    }

    /// Swap in the routes of `other`, surface by surface
    pub fn replace_with(&self, other: &RouteSurfaces) {
        self.frontend.replace_routes(&other.frontend);
        match (&self.metrics, &other.metrics) {
            (Some(current), Some(next)) => current.replace_routes(next),
            (None, None) => {}
            (current, _) => warn!(
                metrics_listener_running = current.is_some(),
                "metrics.enabled changed on reload; restart to apply it to the metrics listener"
            ),
        }
    }
}

/// Named collections built once from configuration and shared by every backend
pub struct Services {
    pub registry: ProviderRegistry,
    pub no_cache: HashSet<String>,
    pub caches: CacheCollection,
    pub tracers: TracerCollection,
    pub authenticators: AuthenticatorCollection,
    pub rewriters: RewriterCollection,
    pub clients: ClientCollection,
}

impl Services {
    /// Build caches, tracers, authenticators and rewriters, but no clients
    pub fn base(config: &Config) -> anyhow::Result<Self> {
        let registry = ProviderRegistry::new();
        Ok(Self {
            no_cache: registry.no_cache_providers(),
            registry,
            caches: build_caches(&config.caches),
            tracers: build_tracers(&config.tracing)?,
            authenticators: build_authenticators(&config.authenticators),
            rewriters: build_rewriters(&config.request_rewriters)?,
            clients: ClientCollection::new(),
        })
    }

    /// Build everything, backend clients included
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut services = Self::base(config)?;
        services.clients = build_clients(&config.backends, &services.caches, &services.registry)?;
        Ok(services)
    }
}

/// One effective path of a backend
#[derive(Debug, Clone, Serialize)]
pub struct PathReport {
    pub key: String,
    pub path: String,
    pub match_type: MatchType,
    pub handler: String,
    pub methods: Vec<String>,
}

/// What registration computed for one backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendReport {
    pub name: String,
    pub provider: String,
    pub is_default: bool,
    pub http_client: HttpClientSettings,
    pub paths: Vec<PathReport>,
    pub health_route: Option<String>,
}

/// Result of a registration run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Registration {
    pub default_backend: Option<String>,
    pub backends: Vec<BackendReport>,
}

/// Resolve the default backend and register every backend on `surfaces`.
///
/// With `dry_run` set, nothing is registered: each backend gets a throwaway
/// client whose computed settings are reported.
pub fn register_all(
    config: &Config,
    services: &Services,
    surfaces: &RouteSurfaces,
    dry_run: bool,
) -> Result<Registration, RouteError> {
    let mut registrar = Registrar {
        config,
        services,
        frontend: &surfaces.frontend,
        dry_run,
        registration: Registration::default(),
    };
    let metrics = surfaces.metrics.as_ref();

    let mut default: Option<(String, BackendOptions)> = None;
    let mut deferred: Option<BackendOptions> = None;

    for (key, options) in &config.backends {
        if !services.registry.contains(&options.provider) {
            return Err(RouteError::UnknownProvider {
                backend: key.clone(),
                provider: options.provider.clone(),
            });
        }
        if options.is_default {
            if let Some((first, _)) = &default {
                return Err(RouteError::DefaultConflict {
                    first: first.clone(),
                    second: key.clone(),
                });
            }
            default = Some((key.clone(), options.clone()));
            continue;
        }
        if key == DEFAULT_BACKEND_NAME {
            deferred = Some(options.clone());
            continue;
        }
        registrar.register_backend(key, options, metrics)?;
    }

    if let Some(mut options) = deferred {
        if default.is_none() {
            info!(backend = DEFAULT_BACKEND_NAME, "Promoting backend to default");
            options.is_default = true;
            default = Some((DEFAULT_BACKEND_NAME.to_string(), options));
        } else {
            registrar.register_backend(DEFAULT_BACKEND_NAME, &options, None)?;
        }
    }

    match default {
        Some((key, options)) => {
            info!(backend = %key, "Registering default backend");
            registrar.register_backend(&key, &options, metrics)?;
            registrar.registration.default_backend = Some(key);
        }
        None => info!("No default backend configured"),
    }

    Ok(registrar.registration)
}

/// Overlay configured paths onto a provider's defaults. A configured key with
/// no matching default starts from [`PathConfig::default`].
pub fn effective_paths(defaults: PathTable, configured: &PathTable) -> PathTable {
    let mut paths = defaults;
    for (key, custom) in configured {
        match paths.get_mut(key) {
            Some(base) => base.merge(custom),
            None => {
                let mut path = PathConfig::default();
                path.merge(custom);
                paths.insert(key.clone(), path);
            }
        }
    }
    paths
}

/// `<prefix>/<backend>` with repeated slashes collapsed
pub fn health_route_path(prefix: &str, backend: &str) -> String {
    let joined = format!("{}/{}", prefix, backend);
    let mut path = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c == '/' && path.ends_with('/') {
            continue;
        }
        path.push(c);
    }
    path
}

struct Registrar<'a> {
    config: &'a Config,
    services: &'a Services,
    frontend: &'a RouterHandle,
    dry_run: bool,
    registration: Registration,
}

impl Registrar<'_> {
    fn register_backend(
        &mut self,
        key: &str,
        options: &BackendOptions,
        metrics: Option<&RouterHandle>,
    ) -> Result<(), RouteError> {
        let mut options = options.clone();
        options.name = key.to_string();

        let cache = self.resolve_cache(&options)?;

        if self.dry_run {
            let client = self.services.registry.construct(ClientArgs {
                name: key,
                options: &options,
                router: RouterHandle::new(),
                cache,
                siblings: &self.services.clients,
                registry: &self.services.registry,
            })?;
            let paths = effective_paths(client.default_path_configs(&options), &options.paths);
            let report = self.report(&options, client.as_ref(), &paths, None);
            debug!(backend = %key, "Validated backend");
            self.registration.backends.push(report);
            return Ok(());
        }

        let client = self
            .services
            .clients
            .get(key)
            .cloned()
            .ok_or_else(|| RouteError::MissingClient(key.to_string()))?;
        client.set_cache(cache.clone());

        let handlers = client.handlers();
        let paths = effective_paths(client.default_path_configs(&options), &options.paths);

        let tracer = options.tracing_name.as_ref().and_then(|name| {
            let tracer = self.services.tracers.get(name).cloned();
            if tracer.is_none() {
                warn!(backend = %key, tracer = %name, "Unknown tracer, tracing disabled");
            }
            tracer
        });
        let ctx = ChainContext {
            client: client.clone(),
            options: Arc::new(options.clone()),
            cache_options: cache.as_ref().map(|c| c.options().clone()),
            tracer,
            authenticators: &self.services.authenticators,
            rewriters: &self.services.rewriters,
        };

        for (path_key, path) in &paths {
            let mut path = path.clone();
            let Some(handler) = handlers.get(&path.handler_name).cloned() else {
                debug!(
                    backend = %key,
                    path = %path_key,
                    handler = %path.handler_name,
                    "Skipping path without a handler"
                );
                continue;
            };
            path.handler = Some(handler.clone());
            let methods = path.resolved_methods();
            if methods.is_empty() {
                debug!(backend = %key, path = %path_key, "Skipping path without methods");
                continue;
            }
            self.register_path_routes(&ctx, &path, &methods, handler)?;
        }

        let health_route = self.register_health_route(&ctx, &handlers, metrics);
        let report = self.report(&options, client.as_ref(), &paths, health_route);
        info!(
            backend = %key,
            provider = %options.provider,
            paths = report.paths.len(),
            "Registered backend"
        );
        self.registration.backends.push(report);
        Ok(())
    }

    fn resolve_cache(&self, options: &BackendOptions) -> Result<Option<Arc<Cache>>, RouteError> {
        if self
            .services
            .no_cache
            .contains(&options.provider.to_ascii_lowercase())
        {
            return Ok(None);
        }
        self.services
            .caches
            .get(&options.cache_name)
            .cloned()
            .map(Some)
            .ok_or_else(|| RouteError::MissingCache(options.cache_name.clone()))
    }

    /// Register one path's chain on the host, backend-prefixed, local and (for
    /// the default backend) root targets
    fn register_path_routes(
        &self,
        ctx: &ChainContext<'_>,
        path: &PathConfig,
        methods: &[Method],
        handler: Handler,
    ) -> Result<(), RouteError> {
        let options = &ctx.options;
        let is_prefix = path.match_type.is_prefix();
        let chain = build_chain(ctx, path, handler)?;

        if !options.hosts.is_empty() {
            self.frontend
                .register_route(&path.path, &options.hosts, methods, is_prefix, chain.clone());
        }

        if !options.path_routing_disabled {
            let prefix = format!("/{}", options.name);
            self.frontend.register_route(
                &format!("{}{}", prefix, path.path),
                &[],
                methods,
                is_prefix,
                strip_path_prefix(&prefix, chain.clone()),
            );
        }

        ctx.client
            .router()
            .register_route(&path.path, &[], methods, is_prefix, chain.clone());

        if options.is_default {
            if is_prefix {
                self.frontend
                    .register_route(&path.path, &[], methods, true, chain.clone());
            }
            self.frontend
                .register_route(&path.path, &[], methods, false, chain);
        }

        debug!(
            backend = %options.name,
            path = %path.path,
            match_type = ?path.match_type,
            handler = %path.handler_name,
            "Registered path"
        );
        Ok(())
    }

    fn register_health_route(
        &self,
        ctx: &ChainContext<'_>,
        handlers: &crate::clients::HandlerTable,
        metrics: Option<&RouterHandle>,
    ) -> Option<String> {
        let options = &ctx.options;
        let metrics = metrics?;
        if !self.config.metrics.health_routes || options.name.is_empty() {
            return None;
        }
        if options.healthcheck.is_disabled() {
            debug!(backend = %options.name, "Health route disabled by health check verb");
            return None;
        }
        let handler = handlers.get(HEALTH_HANDLER)?.clone();

        let route = health_route_path(&self.config.main.health_handler_path, &options.name);
        let path = PathConfig::new(&route, MatchType::Exact, HEALTH_HANDLER, &["GET", "HEAD"]);
        metrics.register_route(
            &route,
            &[],
            &[Method::GET, Method::HEAD],
            false,
            create_resources_middleware(ctx.resources(&path), handler),
        );
        debug!(backend = %options.name, route = %route, "Registered health route");
        Some(route)
    }

    fn report(
        &self,
        options: &BackendOptions,
        client: &dyn BackendClient,
        paths: &PathTable,
        health_route: Option<String>,
    ) -> BackendReport {
        BackendReport {
            name: options.name.clone(),
            provider: options.provider.clone(),
            is_default: options.is_default,
            http_client: client.http_client().settings().clone(),
            paths: paths
                .iter()
                .map(|(key, path)| PathReport {
                    key: key.clone(),
                    path: path.path.clone(),
                    match_type: path.match_type,
                    handler: path.handler_name.clone(),
                    methods: path
                        .resolved_methods()
                        .iter()
                        .map(|m| m.to_string())
                        .collect(),
                })
                .collect(),
            health_route,
        }
    }
}

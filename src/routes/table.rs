//! Host, exact and prefix path dispatch behind the `register_route` capability.
//!
//! Every router surface (frontend, metrics, and each backend's local router) is a
//! [`RouterHandle`]. Registration happens once, before serving; dispatch only
//! takes the read lock long enough to clone the matching handler.

use axum::http::{header::HOST, Method, StatusCode};
use axum::Router;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::handler::{error_response, Handler, Request, Response};
use crate::rewriter::replace_path_and_query;

type MethodTable = HashMap<Method, Handler>;

#[derive(Clone, Default)]
struct RouteSet {
    exact: HashMap<String, MethodTable>,
    prefix: BTreeMap<String, MethodTable>,
}

impl RouteSet {
    fn table_mut(&mut self, path: &str, is_prefix: bool) -> &mut MethodTable {
        if is_prefix {
            self.prefix.entry(path.to_string()).or_default()
        } else {
            self.exact.entry(path.to_string()).or_default()
        }
    }

    /// Candidate method tables for a path: exact first, then prefixes longest first
    fn candidates<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a MethodTable> + 'a {
        let exact = self.exact.get(path);
        let mut prefixes: Vec<(&String, &MethodTable)> = self
            .prefix
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .collect();
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        exact.into_iter().chain(prefixes.into_iter().map(|(_, t)| t))
    }
}

/// Route table of one router surface
#[derive(Clone, Default)]
pub struct PathRouter {
    hosts: HashMap<String, RouteSet>,
    global: RouteSet,
}

/// A registered route, as reported by [`RouterHandle::routes`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RouteInfo {
    pub host: Option<String>,
    pub path: String,
    pub is_prefix: bool,
    pub methods: Vec<String>,
}

enum Lookup {
    Found(Handler),
    MethodNotAllowed,
    NotFound,
}

impl PathRouter {
    fn lookup(&self, host: Option<&str>, path: &str, method: &Method) -> Lookup {
        let mut path_matched = false;
        let host_set = host.and_then(|h| self.hosts.get(h));
        let candidates = host_set
            .into_iter()
            .flat_map(|set| set.candidates(path))
            .chain(self.global.candidates(path));

        for table in candidates {
            path_matched = true;
            if let Some(handler) = table.get(method) {
                return Lookup::Found(handler.clone());
            }
        }

        if path_matched {
            Lookup::MethodNotAllowed
        } else {
            Lookup::NotFound
        }
    }
}

/// Shared handle to a router surface
#[derive(Clone, Default)]
pub struct RouterHandle(Arc<RwLock<PathRouter>>);

impl std::fmt::Debug for RouterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterHandle")
            .field("routes", &self.routes().len())
            .finish()
    }
}

impl RouterHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, PathRouter> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, PathRouter> {
        self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `handler` for `methods` on `path`, scoped to `hosts` when non-empty.
    /// Registering the same host/path/match again adds or replaces per-method handlers.
    pub fn register_route(
        &self,
        path: &str,
        hosts: &[String],
        methods: &[Method],
        is_prefix: bool,
        handler: Handler,
    ) {
        let mut router = self.write();
        if hosts.is_empty() {
            let table = router.global.table_mut(path, is_prefix);
            for method in methods {
                table.insert(method.clone(), handler.clone());
            }
            return;
        }
        for host in hosts {
            let table = router
                .hosts
                .entry(normalize_host(host))
                .or_default()
                .table_mut(path, is_prefix);
            for method in methods {
                table.insert(method.clone(), handler.clone());
            }
        }
    }

    /// Replace this surface's routes with a copy of `source`'s
    pub fn replace_routes(&self, source: &RouterHandle) {
        let routes = source.read().clone();
        *self.write() = routes;
    }

    /// List every registration, sorted
    pub fn routes(&self) -> Vec<RouteInfo> {
        let router = self.read();
        let mut routes = Vec::new();
        let mut collect = |host: Option<&String>, set: &RouteSet| {
            let tables = set
                .exact
                .iter()
                .map(|(p, t)| (p, t, false))
                .chain(set.prefix.iter().map(|(p, t)| (p, t, true)));
            for (path, table, is_prefix) in tables {
                let mut methods: Vec<String> = table.keys().map(|m| m.to_string()).collect();
                methods.sort();
                routes.push(RouteInfo {
                    host: host.cloned(),
                    path: path.clone(),
                    is_prefix,
                    methods,
                });
            }
        };
        collect(None, &router.global);
        for (host, set) in &router.hosts {
            collect(Some(host), set);
        }
        routes.sort();
        routes
    }

    /// Route a request to the matching handler
    pub async fn dispatch(&self, request: Request) -> Response {
        let host = request_host(&request);
        let lookup = self
            .read()
            .lookup(host.as_deref(), request.uri().path(), request.method());

        match lookup {
            Lookup::Found(handler) => handler.call(request).await,
            Lookup::MethodNotAllowed => {
                debug!(method = %request.method(), path = %request.uri().path(), "Method not allowed");
                error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            }
            Lookup::NotFound => {
                debug!(path = %request.uri().path(), "No route matched");
                error_response(StatusCode::NOT_FOUND, "Not found")
            }
        }
    }

    /// A handler that dispatches into this router
    pub fn into_handler(self) -> Handler {
        Handler::new(move |request| {
            let router = self.clone();
            async move { router.dispatch(request).await }
        })
    }

    /// An axum router whose every request is dispatched by this surface
    pub fn axum_router(&self) -> Router {
        let router = self.clone();
        Router::new().fallback(move |request: Request| {
            let router = router.clone();
            async move { router.dispatch(request).await }
        })
    }
}

/// Wrap `handler` so it sees the request path with `prefix` removed
pub fn strip_path_prefix(prefix: &str, handler: Handler) -> Handler {
    let prefix = prefix.trim_end_matches('/').to_string();
    Handler::new(move |mut request: Request| {
        let handler = handler.clone();
        if let Some(rest) = request.uri().path().strip_prefix(prefix.as_str()) {
            let path = if rest.is_empty() {
                "/".to_string()
            } else {
                rest.to_string()
            };
            let query = request.uri().query().map(str::to_string);
            replace_path_and_query(&mut request, &path, query.as_deref());
        }
        async move { handler.call(request).await }
    })
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            name.to_string()
        }
        _ => host,
    }
}

fn request_host(request: &Request) -> Option<String> {
    request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().host().map(str::to_string))
        .map(|h| normalize_host(&h))
}

//! Reverse proxy providers (`rp` and `rpc`).
//!
//! Both forward requests to the backend's origin. The caching variant serves
//! GET and HEAD from the backend's named cache and only stores 2xx responses.

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use super::{BackendClient, ClientArgs, HandlerTable, HttpClientHandle, ProviderKind};
use crate::cache::{Cache, CachedResponse};
use crate::config::{paths::path_key, BackendOptions, MatchType, PathConfig, PathTable};
use crate::handler::{error_response, Handler, Request, Response};
use crate::health::check_upstream;
use crate::middleware::resources::get_resources;
use crate::routes::error::RouteError;
use crate::routes::table::RouterHandle;

const CACHE_STATUS_HEADER: &str = "x-cache";

/// Hop-by-hop headers never forwarded in either direction
const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

struct ProxyInner {
    name: String,
    kind: ProviderKind,
    options: BackendOptions,
    router: RouterHandle,
    cache: RwLock<Option<Arc<Cache>>>,
    http: HttpClientHandle,
}

impl ProxyInner {
    fn cache(&self) -> Option<Arc<Cache>> {
        self.cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Client of the `rp` and `rpc` providers
#[derive(Clone)]
pub struct ProxyClient {
    inner: Arc<ProxyInner>,
}

pub(super) fn new_reverse_proxy(args: ClientArgs<'_>) -> Result<Arc<dyn BackendClient>, RouteError> {
    Ok(Arc::new(ProxyClient::new(args, ProviderKind::ReverseProxy)?))
}

pub(super) fn new_reverse_proxy_cache(
    args: ClientArgs<'_>,
) -> Result<Arc<dyn BackendClient>, RouteError> {
    Ok(Arc::new(ProxyClient::new(args, ProviderKind::ReverseProxyCache)?))
}

impl ProxyClient {
    fn new(args: ClientArgs<'_>, kind: ProviderKind) -> Result<Self, RouteError> {
        let mut options = args.options.clone();
        options.name = args.name.to_string();
        let http = HttpClientHandle::new(&options)?;
        Ok(Self {
            inner: Arc::new(ProxyInner {
                name: args.name.to_string(),
                kind,
                options,
                router: args.router,
                cache: RwLock::new(args.cache),
                http,
            }),
        })
    }
}

impl BackendClient for ProxyClient {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn provider_kind(&self) -> ProviderKind {
        self.inner.kind
    }

    fn configuration(&self) -> &BackendOptions {
        &self.inner.options
    }

    fn default_path_configs(&self, _options: &BackendOptions) -> PathTable {
        let mut paths = PathTable::new();
        match self.inner.kind {
            ProviderKind::ReverseProxyCache => {
                let read = ["GET", "HEAD"];
                let write = ["POST", "PUT", "PATCH", "DELETE", "OPTIONS"];
                paths.insert(
                    path_key("/", &read),
                    PathConfig::new("/", MatchType::Prefix, "proxycache", &read),
                );
                paths.insert(
                    path_key("/", &write),
                    PathConfig::new("/", MatchType::Prefix, "proxy", &write),
                );
            }
            _ => {
                paths.insert(
                    path_key("/", &["*"]),
                    PathConfig::new("/", MatchType::Prefix, "proxy", &["*"]),
                );
            }
        }
        paths
    }

    fn handlers(&self) -> HandlerTable {
        let mut handlers = HashMap::new();

        let inner = self.inner.clone();
        handlers.insert(
            "proxy".to_string(),
            Handler::new(move |request| {
                let inner = inner.clone();
                async move { proxy_request(&inner, request).await }
            }),
        );

        if self.inner.kind == ProviderKind::ReverseProxyCache {
            let inner = self.inner.clone();
            handlers.insert(
                "proxycache".to_string(),
                Handler::new(move |request| {
                    let inner = inner.clone();
                    async move { proxy_cache_request(&inner, request).await }
                }),
            );
        }

        handlers.insert(
            "localresponse".to_string(),
            Handler::new(|request| async move { local_response(&request) }),
        );

        let inner = self.inner.clone();
        handlers.insert(
            "health".to_string(),
            Handler::new(move |_request| {
                let inner = inner.clone();
                async move {
                    check_upstream(&inner.name, &inner.http, &inner.options.healthcheck)
                        .await
                        .into_response()
                }
            }),
        );

        handlers
    }

    fn router(&self) -> RouterHandle {
        self.inner.router.clone()
    }

    fn set_cache(&self, cache: Option<Arc<Cache>>) {
        *self
            .inner
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = cache;
    }

    fn cache(&self) -> Option<Arc<Cache>> {
        self.inner.cache()
    }

    fn http_client(&self) -> &HttpClientHandle {
        &self.inner.http
    }
}

/// Answer with the path's configured status, body and headers
pub fn local_response(request: &Request) -> Response {
    let Some(path) = get_resources(request).and_then(|r| r.path_config.clone()) else {
        return StatusCode::OK.into_response();
    };
    let status = StatusCode::from_u16(path.response_code).unwrap_or(StatusCode::OK);
    let mut response = axum::http::Response::new(Body::from(path.response_body.clone()));
    *response.status_mut() = status;
    apply_headers(response.headers_mut(), &path.response_headers);
    response
}

async fn proxy_request(inner: &ProxyInner, request: Request) -> Response {
    match fetch_upstream(inner, request).await {
        Ok(upstream) => build_response(upstream),
        Err(response) => response,
    }
}

async fn proxy_cache_request(inner: &ProxyInner, request: Request) -> Response {
    let Some(cache) = inner.cache() else {
        return proxy_request(inner, request).await;
    };
    let path = get_resources(&request).and_then(|r| r.path_config.clone());
    let key = cache_key(&inner.name, &request, path.as_deref());

    if let Some(cached) = cache.get(&key).await {
        debug!(backend = %inner.name, key = %key, "Cache hit");
        let mut response = build_response(cached);
        response
            .headers_mut()
            .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
        return response;
    }

    let upstream = match fetch_upstream(inner, request).await {
        Ok(upstream) => upstream,
        Err(response) => return response,
    };
    if (200..300).contains(&upstream.status) {
        cache.put(key, upstream.clone()).await;
    }
    let mut response = build_response(upstream);
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
    response
}

/// Cache key: backend, method, path, selected (or all) query params and headers
fn cache_key(backend: &str, request: &Request, path: Option<&PathConfig>) -> String {
    let mut key = format!("{}|{}|{}", backend, request.method(), request.uri().path());
    let pairs: Vec<(String, String)> = request
        .uri()
        .query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    // re-encode decoded pairs so equivalent spellings share an entry
    let mut query = form_urlencoded::Serializer::new(String::new());
    match path.map(|p| &p.cache_key_params).filter(|p| !p.is_empty()) {
        Some(params) => {
            for param in params {
                let value = pairs
                    .iter()
                    .find(|(k, _)| k == param)
                    .map(|(_, v)| v.as_str())
                    .unwrap_or_default();
                query.append_pair(param, value);
            }
        }
        None => {
            query.extend_pairs(&pairs);
        }
    }
    key.push('|');
    key.push_str(&query.finish());

    if let Some(path) = path {
        for header in &path.cache_key_headers {
            let value = request
                .headers()
                .get(header.to_ascii_lowercase().as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            key.push_str(&format!("|{}:{}", header.to_ascii_lowercase(), value));
        }
    }
    key
}

async fn fetch_upstream(inner: &ProxyInner, request: Request) -> Result<CachedResponse, Response> {
    let origin = &inner.http.settings().origin_url;
    if origin.is_empty() {
        return Err(error_response(
            StatusCode::BAD_GATEWAY,
            format!("backend {} has no origin_url", inner.name),
        ));
    }

    let path = get_resources(&request).and_then(|r| r.path_config.clone());
    let (parts, body) = request.into_parts();

    let mut url = format!("{}{}", origin, parts.uri.path());
    if let Some(query) = parts.uri.query() {
        url.push('?');
        url.push_str(query);
    }

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Unsupported method"))?;
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("Failed to read body: {}", e)))?;

    let mut upstream = inner.http.client().request(method, &url);
    for (name, value) in parts.headers.iter() {
        if is_hop_header(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            upstream = upstream.header(name.as_str(), value);
        }
    }
    if let Some(path) = &path {
        for (name, value) in &path.request_headers {
            upstream = upstream.header(name.as_str(), value.as_str());
        }
        if !path.request_params.is_empty() {
            upstream = upstream.query(&path.request_params);
        }
    }
    if !body.is_empty() {
        upstream = upstream.body(body);
    }

    debug!(backend = %inner.name, url = %url, "Forwarding request upstream");
    let response = upstream.send().await.map_err(|e| {
        warn!(backend = %inner.name, error = %e, "Upstream request failed");
        error_response(StatusCode::BAD_GATEWAY, format!("Upstream request failed: {}", e))
    })?;

    let status = response.status().as_u16();
    let mut headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter(|(name, _)| !is_hop_header(name.as_str()))
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();
    if let Some(path) = &path {
        for (name, value) in &path.response_headers {
            headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
    }
    let body: Bytes = response.bytes().await.map_err(|e| {
        error_response(StatusCode::BAD_GATEWAY, format!("Failed to read upstream body: {}", e))
    })?;

    Ok(CachedResponse {
        status,
        headers,
        body,
    })
}

fn build_response(upstream: CachedResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    for (name, value) in &upstream.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            response.headers_mut().append(name, value);
        }
    }
    response
}

fn apply_headers(target: &mut axum::http::HeaderMap, headers: &HashMap<String, String>) {
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                target.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid response header"),
        }
    }
}

fn is_hop_header(name: &str) -> bool {
    HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

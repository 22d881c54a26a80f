//! Application load balancer provider (`alb`).
//!
//! An alb backend owns no upstream. Its pool is a list of sibling backends, and
//! each request is handed to the selected member's local router, so the member's
//! own middleware chain runs nested inside the alb's.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{BackendClient, ClientArgs, HandlerTable, HttpClientHandle, LoadBalancer, ProviderKind};
use crate::cache::Cache;
use crate::config::{paths::path_key, BackendOptions, MatchType, PathConfig, PathTable};
use crate::handler::{error_response, Handler, Request, Response};
use crate::health::{pool_report, check_upstream};
use crate::routes::error::RouteError;
use crate::routes::table::RouterHandle;

struct AlbInner {
    name: String,
    options: BackendOptions,
    router: RouterHandle,
    http: HttpClientHandle,
    pool: Vec<Arc<dyn BackendClient>>,
    balancer: LoadBalancer,
}

/// Client of the `alb` provider
#[derive(Clone)]
pub struct AlbClient {
    inner: Arc<AlbInner>,
}

pub(super) fn new_alb(args: ClientArgs<'_>) -> Result<Arc<dyn BackendClient>, RouteError> {
    Ok(Arc::new(AlbClient::new(args)?))
}

impl AlbClient {
    fn new(args: ClientArgs<'_>) -> Result<Self, RouteError> {
        let mut options = args.options.clone();
        options.name = args.name.to_string();
        let alb = options.alb.clone().ok_or_else(|| RouteError::Provider {
            backend: args.name.to_string(),
            message: "alb provider requires an alb section".to_string(),
        })?;

        let mut pool = Vec::with_capacity(alb.pool.len());
        for member in &alb.pool {
            if member == args.name {
                return Err(RouteError::InvalidConfig(format!(
                    "alb {} cannot include itself in its pool",
                    args.name
                )));
            }
            let client = args.siblings.get(member).ok_or_else(|| {
                RouteError::InvalidConfig(format!(
                    "alb {} pool member [{}] is not a known backend",
                    args.name, member
                ))
            })?;
            pool.push(client.clone());
        }

        let http = HttpClientHandle::new(&options)?;
        Ok(Self {
            inner: Arc::new(AlbInner {
                name: args.name.to_string(),
                balancer: LoadBalancer::new(pool.len(), alb.mechanism),
                options,
                router: args.router,
                http,
                pool,
            }),
        })
    }

    /// Names of the pool members, in configured order
    pub fn pool_names(&self) -> Vec<String> {
        self.inner.pool.iter().map(|m| m.name().to_string()).collect()
    }
}

impl BackendClient for AlbClient {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::LoadBalancer
    }

    fn configuration(&self) -> &BackendOptions {
        &self.inner.options
    }

    fn default_path_configs(&self, _options: &BackendOptions) -> PathTable {
        let mut paths = PathTable::new();
        paths.insert(
            path_key("/", &["*"]),
            PathConfig::new("/", MatchType::Prefix, "alb", &["*"]),
        );
        paths
    }

    fn handlers(&self) -> HandlerTable {
        let mut handlers = HashMap::new();

        let inner = self.inner.clone();
        handlers.insert(
            "alb".to_string(),
            Handler::new(move |request| {
                let inner = inner.clone();
                async move { dispatch_to_member(&inner, request).await }
            }),
        );

        let inner = self.inner.clone();
        handlers.insert(
            "health".to_string(),
            Handler::new(move |_request| {
                let inner = inner.clone();
                async move {
                    let checks = inner.pool.iter().map(|member| {
                        check_upstream(
                            member.name(),
                            member.http_client(),
                            &member.configuration().healthcheck,
                        )
                    });
                    pool_report(&inner.name, join_all(checks).await).into_response()
                }
            }),
        );

        handlers
    }

    fn router(&self) -> RouterHandle {
        self.inner.router.clone()
    }

    fn set_cache(&self, _cache: Option<Arc<Cache>>) {}

    fn cache(&self) -> Option<Arc<Cache>> {
        None
    }

    fn http_client(&self) -> &HttpClientHandle {
        &self.inner.http
    }
}

async fn dispatch_to_member(inner: &AlbInner, request: Request) -> Response {
    let Some(selection) = inner.balancer.select() else {
        return error_response(
            StatusCode::BAD_GATEWAY,
            format!("alb {} has no pool members", inner.name),
        );
    };
    let member = &inner.pool[selection.index()];
    debug!(alb = %inner.name, member = %member.name(), "Dispatching to pool member");
    member.router().dispatch(request).await
}

//! Per-path middleware chain.
//!
//! Wrappers are applied innermost first, so the request passes through them in
//! the reverse order:
//!
//! 1. body limit
//! 2. tracing span
//! 3. authentication
//! 4. compression
//! 5. resource context
//! 6. request rewriters
//! 7. metrics (outermost)

use std::sync::Arc;
use tracing::debug;

use crate::auth::AuthenticatorCollection;
use crate::cache::CacheOptions;
use crate::clients::BackendClient;
use crate::config::{paths::AUTHENTICATOR_NONE, BackendOptions, PathConfig};
use crate::handler::Handler;
use crate::middleware::{
    create_auth_middleware, create_body_limit_middleware, create_compression_middleware,
    create_metrics_middleware, create_resources_middleware, create_rewrite_middleware,
    create_tracing_middleware, resolve_authenticator, BodyLimitConfig, MetricLabels, Resources,
    SpanAttributes,
};
use crate::rewriter::RewriterCollection;
use crate::routes::error::RouteError;
use crate::tracer::Tracer;

/// Everything resolved for one backend that its path chains share
#[derive(Clone)]
pub struct ChainContext<'a> {
    pub client: Arc<dyn BackendClient>,
    pub options: Arc<BackendOptions>,
    pub cache_options: Option<CacheOptions>,
    pub tracer: Option<Arc<Tracer>>,
    pub authenticators: &'a AuthenticatorCollection,
    pub rewriters: &'a RewriterCollection,
}

impl ChainContext<'_> {
    /// The resource bundle injected for `path`
    pub fn resources(&self, path: &PathConfig) -> Resources {
        Resources {
            backend_client: Some(self.client.clone()),
            backend_options: Some(self.options.clone()),
            cache_options: self.cache_options.clone(),
            path_config: Some(Arc::new(path.clone())),
            tracer: self.tracer.clone(),
            dispatch_chain: vec![self.options.name.clone()],
            is_merge_member: false,
        }
    }
}

/// Wrap `handler` in the path's middleware chain
pub fn build_chain(
    ctx: &ChainContext<'_>,
    path: &PathConfig,
    handler: Handler,
) -> Result<Handler, RouteError> {
    let options = &ctx.options;
    let mut next = handler;

    let body_limit = BodyLimitConfig {
        max_bytes: path
            .max_request_body_size_bytes
            .unwrap_or(options.max_request_body_size_bytes),
        truncate: path
            .truncate_request_body_too_large
            .unwrap_or(options.truncate_request_body_too_large),
    };
    if body_limit.max_bytes > 0 {
        next = create_body_limit_middleware(body_limit, next);
    }

    if let Some(tracer) = &ctx.tracer {
        next = create_tracing_middleware(
            tracer.clone(),
            SpanAttributes {
                backend_name: options.name.clone(),
                provider: options.provider.clone(),
                path: path.path.clone(),
                cache_name: ctx.client.cache().map(|c| c.name().to_string()),
            },
            next,
        );
    }

    for name in [path.authenticator_name.as_deref(), options.authenticator_name.as_deref()]
        .into_iter()
        .flatten()
    {
        if name != AUTHENTICATOR_NONE && !ctx.authenticators.contains_key(name) {
            return Err(RouteError::InvalidConfig(format!(
                "backend {} references unknown authenticator [{}]",
                options.name, name
            )));
        }
    }
    if let Some(authenticator) = resolve_authenticator(
        path.authenticator_name.as_deref(),
        options.authenticator_name.as_deref(),
        ctx.authenticators,
    ) {
        next = create_auth_middleware(authenticator, next);
    }

    if !options.compressible_types.is_empty() {
        next = create_compression_middleware(&options.compressible_types, next);
    }

    next = create_resources_middleware(ctx.resources(path), next);

    let mut rewriters = Vec::new();
    if let Some(name) = &options.req_rewriter_name {
        rewriters.push(lookup_rewriter(ctx, name)?);
    }
    match (&path.req_rewriter, &path.req_rewriter_name) {
        (Some(rewriter), _) => rewriters.push(rewriter.clone()),
        (None, Some(name)) => rewriters.push(lookup_rewriter(ctx, name)?),
        (None, None) => {}
    }
    if !rewriters.is_empty() {
        next = create_rewrite_middleware(rewriters, next);
    }

    if !path.no_metrics {
        next = create_metrics_middleware(
            MetricLabels {
                backend_name: options.name.clone(),
                provider: options.provider.clone(),
                path: path.path.clone(),
            },
            next,
        );
    } else {
        debug!(backend = %options.name, path = %path.path, "Metrics disabled for path");
    }

    Ok(next)
}

fn lookup_rewriter(
    ctx: &ChainContext<'_>,
    name: &str,
) -> Result<Arc<crate::rewriter::RewriteList>, RouteError> {
    ctx.rewriters.get(name).cloned().ok_or_else(|| {
        RouteError::InvalidConfig(format!(
            "backend {} references unknown rewriter [{}]",
            ctx.options.name, name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Authenticator, AuthenticatorOptions};
    use crate::clients::{ClientArgs, ClientCollection, ProviderRegistry};
    use crate::handler::Request;
    use crate::rewriter::{RewriteInstruction, RewriteList};
    use crate::routes::table::RouterHandle;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use axum::response::IntoResponse;

    fn client(options: &BackendOptions) -> Arc<dyn BackendClient> {
        let registry = ProviderRegistry::new();
        registry
            .construct(ClientArgs {
                name: &options.name,
                options,
                router: RouterHandle::new(),
                cache: None,
                siblings: &ClientCollection::new(),
                registry: &registry,
            })
            .ok()
            .unwrap()
    }

    fn authenticators() -> AuthenticatorCollection {
        let mut all = AuthenticatorCollection::new();
        all.insert(
            "keys".to_string(),
            Arc::new(Authenticator::new(
                "keys",
                AuthenticatorOptions::ApiKey {
                    header: "x-api-key".to_string(),
                    keys: vec!["secret".to_string()],
                },
            )),
        );
        all
    }

    fn rewriters() -> RewriterCollection {
        let mut all = RewriterCollection::new();
        all.insert(
            "add-key".to_string(),
            Arc::new(
                RewriteList::compile(
                    "add-key",
                    &[RewriteInstruction::SetHeader {
                        name: "x-api-key".to_string(),
                        value: "secret".to_string(),
                    }],
                )
                .unwrap(),
            ),
        );
        all
    }

    fn ok_handler() -> Handler {
        Handler::new(|_request| async { StatusCode::OK.into_response() })
    }

    fn backend(max_body: usize) -> BackendOptions {
        let mut options = BackendOptions::new("api", "rp");
        options.authenticator_name = Some("keys".to_string());
        options.max_request_body_size_bytes = max_body;
        options
    }

    fn post(size: usize) -> Request {
        Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::from(vec![b'a'; size]))
            .unwrap()
    }

    #[tokio::test]
    async fn test_auth_runs_before_body_limit() {
        let options = backend(10);
        let auths = authenticators();
        let rws = rewriters();
        let ctx = ChainContext {
            client: client(&options),
            options: Arc::new(options),
            cache_options: None,
            tracer: None,
            authenticators: &auths,
            rewriters: &rws,
        };
        let chain = build_chain(&ctx, &PathConfig::default(), ok_handler()).unwrap();

        // oversized and unauthenticated: auth rejects first
        assert_eq!(chain.call(post(100)).await.status(), StatusCode::UNAUTHORIZED);

        let mut request = post(100);
        request
            .headers_mut()
            .insert("x-api-key", "secret".parse().unwrap());
        assert_eq!(
            chain.call(request).await.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[tokio::test]
    async fn test_rewriters_run_before_auth() {
        let mut options = backend(1024);
        options.req_rewriter_name = Some("add-key".to_string());
        let auths = authenticators();
        let rws = rewriters();
        let ctx = ChainContext {
            client: client(&options),
            options: Arc::new(options),
            cache_options: None,
            tracer: None,
            authenticators: &auths,
            rewriters: &rws,
        };
        let chain = build_chain(&ctx, &PathConfig::default(), ok_handler()).unwrap();
        assert_eq!(chain.call(post(1)).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_none_authenticator_skips_backend_auth() {
        let options = backend(1024);
        let auths = authenticators();
        let rws = rewriters();
        let ctx = ChainContext {
            client: client(&options),
            options: Arc::new(options),
            cache_options: None,
            tracer: None,
            authenticators: &auths,
            rewriters: &rws,
        };
        let mut path = PathConfig::default();
        path.authenticator_name = Some("none".to_string());
        let chain = build_chain(&ctx, &path, ok_handler()).unwrap();
        assert_eq!(chain.call(post(1)).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_path_body_limit_overrides_backend() {
        let mut options = BackendOptions::new("api", "rp");
        options.max_request_body_size_bytes = 100;
        let auths = AuthenticatorCollection::new();
        let rws = RewriterCollection::new();
        let ctx = ChainContext {
            client: client(&options),
            options: Arc::new(options),
            cache_options: None,
            tracer: None,
            authenticators: &auths,
            rewriters: &rws,
        };
        let body_len = Handler::new(|request: Request| async move {
            let body = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .unwrap();
            body.len().to_string().into_response()
        });

        let mut path = PathConfig::default();
        path.max_request_body_size_bytes = Some(5000);
        path.truncate_request_body_too_large = Some(true);
        let chain = build_chain(&ctx, &path, body_len.clone()).unwrap();
        let response = chain.call(post(6000)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"5000");

        path.truncate_request_body_too_large = Some(false);
        let chain = build_chain(&ctx, &path, body_len).unwrap();
        assert_eq!(
            chain.call(post(6000)).await.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(chain.call(post(4000)).await.status(), StatusCode::OK);
    }

    #[test]
    fn test_unknown_rewriter_is_an_error() {
        let mut options = BackendOptions::new("api", "rp");
        options.req_rewriter_name = Some("ghost".to_string());
        let auths = AuthenticatorCollection::new();
        let rws = RewriterCollection::new();
        let ctx = ChainContext {
            client: client(&options),
            options: Arc::new(options),
            cache_options: None,
            tracer: None,
            authenticators: &auths,
            rewriters: &rws,
        };
        let err = build_chain(&ctx, &PathConfig::default(), ok_handler())
            .err()
            .unwrap();
        assert!(matches!(err, RouteError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_handler_sees_resources() {
        let options = BackendOptions::new("api", "rp");
        let auths = AuthenticatorCollection::new();
        let rws = RewriterCollection::new();
        let ctx = ChainContext {
            client: client(&options),
            options: Arc::new(options),
            cache_options: None,
            tracer: None,
            authenticators: &auths,
            rewriters: &rws,
        };
        let mut path = PathConfig::default();
        path.path = "/status".to_string();
        let handler = Handler::new(|request: Request| async move {
            let resources = crate::middleware::get_resources(&request).cloned().unwrap();
            format!(
                "{}:{}",
                resources.backend_name().unwrap_or_default(),
                resources
                    .path_config
                    .as_ref()
                    .map(|p| p.path.clone())
                    .unwrap_or_default()
            )
            .into_response()
        });
        let chain = build_chain(&ctx, &path, handler).unwrap();

        let request = Request::builder().uri("/status").body(Body::empty()).unwrap();
        let response = chain.call(request).await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"api:/status");
    }
}

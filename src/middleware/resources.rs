use std::fmt;
use std::sync::Arc;

use crate::cache::CacheOptions;
use crate::clients::BackendClient;
use crate::config::{BackendOptions, PathConfig};
use crate::handler::{Handler, Request};
use crate::tracer::Tracer;

/// Resolved references for the backend and path serving a request.
///
/// Injected into request extensions by [`create_resources_middleware`] and read by
/// the backend handlers. When a load balancer hands the request to a pool
/// member, the member's bundle is merged into the one already present.
#[derive(Clone, Default)]
pub struct Resources {
    pub backend_client: Option<Arc<dyn BackendClient>>,
    pub backend_options: Option<Arc<BackendOptions>>,
    pub cache_options: Option<CacheOptions>,
    pub path_config: Option<Arc<PathConfig>>,
    pub tracer: Option<Arc<Tracer>>,
    /// Backends this request passed through, outermost first
    pub dispatch_chain: Vec<String>,
    /// Set once the bundle has been merged by a nested dispatch
    pub is_merge_member: bool,
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field(
                "backend",
                &self.backend_options.as_ref().map(|o| o.name.as_str()),
            )
            .field("path", &self.path_config.as_ref().map(|p| p.path.as_str()))
            .field("cache_options", &self.cache_options)
            .field("tracer", &self.tracer.as_ref().map(|t| t.name()))
            .field("dispatch_chain", &self.dispatch_chain)
            .field("is_merge_member", &self.is_merge_member)
            .finish()
    }
}

impl Resources {
    pub fn backend_name(&self) -> Option<&str> {
        self.backend_options.as_ref().map(|o| o.name.as_str())
    }

    /// Layer `inner` onto this bundle: fields `inner` sets replace ours, the
    /// dispatch chain is extended, and the bundle is marked as merged
    pub fn merge(&mut self, inner: Resources) {
        if inner.backend_client.is_some() {
            self.backend_client = inner.backend_client;
        }
        if inner.backend_options.is_some() {
            self.backend_options = inner.backend_options;
        }
        if inner.cache_options.is_some() {
            self.cache_options = inner.cache_options;
        }
        if inner.path_config.is_some() {
            self.path_config = inner.path_config;
        }
        if inner.tracer.is_some() {
            self.tracer = inner.tracer;
        }
        self.dispatch_chain.extend(inner.dispatch_chain);
        self.is_merge_member = true;
    }
}

/// Name of the backend that served a response, set on response extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedBy(pub String);

/// The bundle attached to a request, if any
pub fn get_resources(request: &Request) -> Option<&Resources> {
    request.extensions().get::<Resources>()
}

/// Attach `resources` to every request, merging into an existing bundle.
/// The innermost backend is recorded as [`ServedBy`] on the response.
pub fn create_resources_middleware(resources: Resources, next: Handler) -> Handler {
    Handler::new(move |mut request: Request| {
        let next = next.clone();
        let bundle = resources.clone();
        let backend = bundle.backend_name().map(str::to_string);
        match request.extensions_mut().get_mut::<Resources>() {
            Some(existing) => existing.merge(bundle),
            None => {
                request.extensions_mut().insert(bundle);
            }
        }
        async move {
            let mut response = next.call(request).await;
            if let Some(backend) = backend {
                if response.extensions().get::<ServedBy>().is_none() {
                    response.extensions_mut().insert(ServedBy(backend));
                }
            }
            response
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::response::IntoResponse;

    fn bundle(backend: &str, path: &str) -> Resources {
        let mut options = BackendOptions::new(backend, "rp");
        options.name = backend.to_string();
        let mut path_config = PathConfig::default();
        path_config.path = path.to_string();
        Resources {
            backend_options: Some(Arc::new(options)),
            path_config: Some(Arc::new(path_config)),
            dispatch_chain: vec![backend.to_string()],
            ..Default::default()
        }
    }

    fn describe() -> Handler {
        Handler::new(|request: Request| async move {
            let resources = get_resources(&request).cloned().unwrap_or_default();
            format!(
                "{}|{}|{}|{}",
                resources.backend_name().unwrap_or("-"),
                resources
                    .path_config
                    .as_ref()
                    .map(|p| p.path.clone())
                    .unwrap_or_default(),
                resources.dispatch_chain.join(">"),
                resources.is_merge_member
            )
            .into_response()
        })
    }

    async fn body_of(handler: &Handler, request: Request) -> String {
        let response = handler.call(request).await;
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_inject_resources() {
        let handler = create_resources_middleware(bundle("api", "/q"), describe());
        let request = Request::builder().uri("/q").body(Body::empty()).unwrap();
        assert_eq!(body_of(&handler, request).await, "api|/q|api|false");
    }

    #[tokio::test]
    async fn test_nested_dispatch_merges() {
        let inner = create_resources_middleware(bundle("member", "/member"), describe());
        let outer = create_resources_middleware(bundle("lb", "/"), inner);
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(body_of(&outer, request).await, "member|/member|lb>member|true");
    }

    #[tokio::test]
    async fn test_served_by_is_innermost_backend() {
        let inner = create_resources_middleware(bundle("member", "/member"), describe());
        let outer = create_resources_middleware(bundle("lb", "/"), inner);
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = outer.call(request).await;
        assert_eq!(
            response.extensions().get::<ServedBy>(),
            Some(&ServedBy("member".to_string()))
        );
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut outer = bundle("lb", "/");
        outer.cache_options = Some(CacheOptions::default());
        outer.merge(Resources::default());
        assert_eq!(outer.backend_name(), Some("lb"));
        assert!(outer.cache_options.is_some());
        assert!(outer.is_merge_member);
    }
}

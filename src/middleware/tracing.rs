use opentelemetry::{
    trace::{Span, SpanKind, Status, Tracer as _},
    KeyValue,
};
use std::sync::Arc;
use std::time::SystemTime;

use crate::handler::{Handler, Request};
use crate::tracer::Tracer;

/// Attributes attached to every span of one path
#[derive(Debug, Clone)]
pub struct SpanAttributes {
    pub backend_name: String,
    pub provider: String,
    pub path: String,
    pub cache_name: Option<String>,
}

/// Start a server span around each request
pub fn create_tracing_middleware(
    tracer: Arc<Tracer>,
    attributes: SpanAttributes,
    next: Handler,
) -> Handler {
    Handler::new(move |request: Request| {
        let next = next.clone();
        let tracer = tracer.clone();
        let attributes = attributes.clone();
        async move {
            let method = request.method().to_string();
            let mut span = tracer
                .inner()
                .span_builder(format!("{} {}", method, attributes.path))
                .with_kind(SpanKind::Server)
                .with_start_time(SystemTime::now())
                .start(tracer.inner());

            span.set_attribute(KeyValue::new("http.method", method));
            span.set_attribute(KeyValue::new("http.target", request.uri().path().to_string()));
            span.set_attribute(KeyValue::new("backend.name", attributes.backend_name.clone()));
            span.set_attribute(KeyValue::new("backend.provider", attributes.provider.clone()));
            span.set_attribute(KeyValue::new("router.path", attributes.path.clone()));
            if let Some(cache) = &attributes.cache_name {
                span.set_attribute(KeyValue::new("cache.name", cache.clone()));
            }
            if let Some(request_id) = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
            {
                span.set_attribute(KeyValue::new("request.id", request_id.to_string()));
            }

            // the sdk span also ends when dropped, so an aborted request still closes it
            let response = next.call(request).await;

            let status_code = response.status().as_u16();
            span.set_attribute(KeyValue::new("http.status_code", status_code as i64));
            if status_code >= 500 {
                span.set_status(Status::error("Server error"));
            } else if status_code >= 400 {
                span.set_status(Status::error("Client error"));
            } else {
                span.set_status(Status::Ok);
            }
            span.end();

            response
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::TracingOptions;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn test_tracing_passes_response_through() {
        let tracer = Arc::new(Tracer::new("local", &TracingOptions::default()).unwrap());
        let handler = create_tracing_middleware(
            tracer,
            SpanAttributes {
                backend_name: "api".to_string(),
                provider: "rp".to_string(),
                path: "/".to_string(),
                cache_name: None,
            },
            Handler::new(|_request| async { StatusCode::CREATED.into_response() }),
        );

        let request = Request::builder().uri("/q").body(Body::empty()).unwrap();
        assert_eq!(handler.call(request).await.status(), StatusCode::CREATED);
    }
}

use axum::{extract::Request, middleware::Next, response::Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::request_id::RequestId;
use super::resources::ServedBy;
use crate::config::LoggingConfig;

/// Frontend access log: one line per request and one per response
pub async fn logging_middleware(
    config: Arc<LoggingConfig>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        "Incoming request"
    );

    if config.log_headers {
        debug!(request_id = %request_id, headers = ?request.headers(), "Request headers");
    }

    let response = next.run(request).await;

    let backend = response
        .extensions()
        .get::<ServedBy>()
        .map(|s| s.0.clone())
        .unwrap_or_default();
    info!(
        request_id = %request_id,
        status = response.status().as_u16(),
        backend = %backend,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Response sent"
    );

    response
}

/// Create logging middleware with config
pub fn create_logging_middleware(
    config: LoggingConfig,
) -> impl Fn(Request, Next) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>
       + Clone {
    let config = Arc::new(config);
    move |request: Request, next: Next| {
        let config = config.clone();
        Box::pin(async move { logging_middleware(config, request, next).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_logging_passes_through() {
        let app = Router::new()
            .route("/", get(|| async { StatusCode::NO_CONTENT }))
            .layer(axum::middleware::from_fn(create_logging_middleware(
                LoggingConfig { log_headers: true },
            )));

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

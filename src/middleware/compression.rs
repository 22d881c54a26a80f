use axum::http::{header::CONTENT_TYPE, Extensions, HeaderMap, StatusCode, Version};
use std::sync::Arc;
use tower::Layer;
use tower_http::compression::CompressionLayer;

use crate::handler::Handler;

/// Compress only responses whose content type is in the backend's list
#[derive(Debug, Clone)]
pub struct CompressibleTypes(Arc<Vec<String>>);

impl CompressibleTypes {
    pub fn new(types: &[String]) -> Self {
        Self(Arc::new(
            types.iter().map(|t| t.trim().to_ascii_lowercase()).collect(),
        ))
    }

    pub fn matches(&self, content_type: &str) -> bool {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.0.iter().any(|t| *t == mime)
    }
}

/// Negotiate gzip or brotli for compressible responses
pub fn create_compression_middleware(types: &[String], next: Handler) -> Handler {
    let types = CompressibleTypes::new(types);
    let predicate = move |_: StatusCode, _: Version, headers: &HeaderMap, _: &Extensions| {
        headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| types.matches(ct))
            .unwrap_or(false)
    };
    let layer = CompressionLayer::new().compress_when(predicate);
    Handler::from_service(layer.layer(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Request;
    use axum::body::Body;
    use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
    use axum::response::IntoResponse;

    fn json_handler() -> Handler {
        Handler::new(|_request| async {
            (
                [(CONTENT_TYPE, "application/json")],
                "{\"data\":\"".to_string() + &"x".repeat(2048) + "\"}",
            )
                .into_response()
        })
    }

    fn gzip_request() -> Request {
        Request::builder()
            .uri("/")
            .header(ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_matches_ignores_parameters() {
        let types = CompressibleTypes::new(&["application/json".to_string()]);
        assert!(types.matches("application/json; charset=utf-8"));
        assert!(!types.matches("image/png"));
    }

    #[tokio::test]
    async fn test_compresses_listed_types() {
        let handler =
            create_compression_middleware(&["application/json".to_string()], json_handler());
        let response = handler.call(gzip_request()).await;
        assert_eq!(response.headers()[CONTENT_ENCODING], "gzip");
    }

    #[tokio::test]
    async fn test_skips_unlisted_types() {
        let handler = create_compression_middleware(&["text/plain".to_string()], json_handler());
        let response = handler.call(gzip_request()).await;
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
    }
}

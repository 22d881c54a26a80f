use axum::body::{Body, Bytes};
use axum::http::{Method, StatusCode};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::handler::{error_response, Handler, Request};

/// Request body limit for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLimitConfig {
    pub max_bytes: usize,
    /// Forward oversized bodies cut to `max_bytes` instead of rejecting them
    pub truncate: bool,
}

fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

enum BodyRead {
    Complete(Bytes),
    TooLarge(Bytes),
}

/// Read at most `max + 1` bytes so oversized bodies are detected without
/// buffering them whole
async fn read_bounded(body: Body, max: usize) -> Result<BodyRead, axum::Error> {
    let mut stream = body.into_data_stream();
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let room = max.saturating_add(1) - buffer.len();
        if chunk.len() >= room {
            buffer.extend_from_slice(&chunk[..room]);
            buffer.truncate(max);
            return Ok(BodyRead::TooLarge(Bytes::from(buffer)));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(BodyRead::Complete(Bytes::from(buffer)))
}

/// Enforce the body limit on POST, PUT and PATCH requests
pub fn create_body_limit_middleware(config: BodyLimitConfig, next: Handler) -> Handler {
    Handler::new(move |request: Request| {
        let next = next.clone();
        async move {
            if !is_mutating(request.method()) {
                return next.call(request).await;
            }

            let (parts, body) = request.into_parts();
            let bytes = match read_bounded(body, config.max_bytes).await {
                Ok(BodyRead::Complete(bytes)) => bytes,
                Ok(BodyRead::TooLarge(bytes)) if config.truncate => {
                    debug!(
                        limit = config.max_bytes,
                        path = %parts.uri.path(),
                        "Truncating oversized request body"
                    );
                    bytes
                }
                Ok(BodyRead::TooLarge(_)) => {
                    warn!(
                        limit = config.max_bytes,
                        path = %parts.uri.path(),
                        "Rejecting oversized request body"
                    );
                    return error_response(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        format!("Request body exceeds {} bytes", config.max_bytes),
                    );
                }
                Err(e) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read request body: {}", e),
                    );
                }
            };

            let mut request = Request::from_parts(parts, Body::from(bytes.clone()));
            if let Ok(len) = axum::http::HeaderValue::from_str(&bytes.len().to_string()) {
                request
                    .headers_mut()
                    .insert(axum::http::header::CONTENT_LENGTH, len);
            }
            next.call(request).await
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    fn body_length_echo() -> Handler {
        Handler::new(|request: Request| async move {
            let body = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .unwrap();
            body.len().to_string().into_response()
        })
    }

    fn post(size: usize) -> Request {
        Request::builder()
            .method(Method::POST)
            .uri("/write")
            .body(Body::from(vec![b'a'; size]))
            .unwrap()
    }

    async fn body_of(response: crate::handler::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let handler = create_body_limit_middleware(
            BodyLimitConfig {
                max_bytes: 5000,
                truncate: false,
            },
            body_length_echo(),
        );
        let response = handler.call(post(6000)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_oversized_body_truncated() {
        let handler = create_body_limit_middleware(
            BodyLimitConfig {
                max_bytes: 5000,
                truncate: true,
            },
            body_length_echo(),
        );
        let response = handler.call(post(6000)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, "5000");
    }

    #[tokio::test]
    async fn test_body_within_limit() {
        let handler = create_body_limit_middleware(
            BodyLimitConfig {
                max_bytes: 5000,
                truncate: false,
            },
            body_length_echo(),
        );
        assert_eq!(body_of(handler.call(post(5000)).await).await, "5000");
    }

    #[tokio::test]
    async fn test_reads_are_not_limited() {
        let handler = create_body_limit_middleware(
            BodyLimitConfig {
                max_bytes: 10,
                truncate: false,
            },
            body_length_echo(),
        );
        let request = Request::builder()
            .method(Method::GET)
            .uri("/read")
            .body(Body::from(vec![b'a'; 100]))
            .unwrap();
        assert_eq!(body_of(handler.call(request).await).await, "100");
    }
}

use axum::body::Body;
use futures::StreamExt;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use crate::handler::{Handler, Request};

pub const REQUESTS_TOTAL: &str = "gateway_proxy_requests_total";
pub const REQUEST_DURATION: &str = "gateway_proxy_request_duration_seconds";
pub const RESPONSE_BYTES: &str = "gateway_proxy_response_bytes_total";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Install the Prometheus recorder; later calls return the same handle
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION.to_string()),
            &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        )?
        .install_recorder()?;

    describe_counter!(REQUESTS_TOTAL, "Total number of proxied requests by status class");
    describe_histogram!(REQUEST_DURATION, "Proxied request duration in seconds");
    describe_counter!(RESPONSE_BYTES, "Total response body bytes written");

    PROMETHEUS_HANDLE.set(handle.clone()).ok();
    Ok(handle)
}

/// Get the Prometheus handle
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Handler for Prometheus metrics endpoint
pub async fn metrics_handler() -> String {
    if let Some(handle) = get_metrics_handle() {
        handle.render()
    } else {
        "# Metrics not initialized\n".to_string()
    }
}

/// Fixed labels of one registered path
#[derive(Debug, Clone)]
pub struct MetricLabels {
    pub backend_name: String,
    pub provider: String,
    pub path: String,
}

/// Record duration, status class and bytes written for every request
pub fn create_metrics_middleware(labels: MetricLabels, next: Handler) -> Handler {
    let labels = Arc::new(labels);
    Handler::new(move |request: Request| {
        let next = next.clone();
        let labels = labels.clone();
        async move {
            let start = Instant::now();
            let method = request.method().to_string();

            let response = next.call(request).await;

            let status_class = format!("{}xx", response.status().as_u16() / 100);
            counter!(
                REQUESTS_TOTAL,
                "backend_name" => labels.backend_name.clone(),
                "provider" => labels.provider.clone(),
                "method" => method.clone(),
                "path" => labels.path.clone(),
                "status_class" => status_class.clone()
            )
            .increment(1);
            histogram!(
                REQUEST_DURATION,
                "backend_name" => labels.backend_name.clone(),
                "provider" => labels.provider.clone(),
                "method" => method.clone(),
                "path" => labels.path.clone(),
                "status_class" => status_class
            )
            .record(start.elapsed().as_secs_f64());

            let bytes_written = counter!(
                RESPONSE_BYTES,
                "backend_name" => labels.backend_name.clone(),
                "provider" => labels.provider.clone(),
                "method" => method,
                "path" => labels.path.clone()
            );
            response.map(|body| {
                Body::from_stream(body.into_data_stream().inspect(move |chunk| {
                    if let Ok(chunk) = chunk {
                        bytes_written.increment(chunk.len() as u64);
                    }
                }))
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn test_metrics_decorator_records_series() {
        let handle = init_metrics().unwrap();
        // second call returns the installed recorder
        assert!(init_metrics().is_ok());

        let handler = create_metrics_middleware(
            MetricLabels {
                backend_name: "metrics-test".to_string(),
                provider: "rp".to_string(),
                path: "/m".to_string(),
            },
            Handler::new(|_request| async { (StatusCode::ACCEPTED, "hello").into_response() }),
        );

        let request = Request::builder().uri("/m").body(Body::empty()).unwrap();
        let response = handler.call(request).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello");

        let output = handle.render();
        assert!(output.contains(REQUESTS_TOTAL));
        assert!(output.contains("backend_name=\"metrics-test\""));
        assert!(output.contains("status_class=\"2xx\""));
        assert!(output.contains(REQUEST_DURATION));
        assert!(output.contains(RESPONSE_BYTES));
    }

    #[tokio::test]
    async fn test_metrics_handler_renders() {
        init_metrics().unwrap();
        let output = metrics_handler().await;
        assert!(!output.starts_with("# Metrics not initialized"));
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::clients::HttpClientHandle;
use crate::config::HealthCheckOptions;

/// Health state of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of a backend health check
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub backend: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<HealthReport>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

impl IntoResponse for HealthReport {
    fn into_response(self) -> Response {
        let code = if self.is_healthy() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (code, Json(self)).into_response()
    }
}

/// Check a backend's origin with its configured health check
pub async fn check_upstream(
    backend: &str,
    http: &HttpClientHandle,
    options: &HealthCheckOptions,
) -> HealthReport {
    let start = Instant::now();
    let report = |status, upstream_status, detail: Option<String>| HealthReport {
        backend: backend.to_string(),
        status,
        upstream_status,
        latency_ms: start.elapsed().as_millis() as u64,
        detail,
        members: Vec::new(),
    };

    let origin = &http.settings().origin_url;
    if origin.is_empty() {
        return report(
            HealthStatus::Unhealthy,
            None,
            Some("no origin_url configured".to_string()),
        );
    }

    let method = match reqwest::Method::from_bytes(options.verb.to_ascii_uppercase().as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            return report(
                HealthStatus::Unhealthy,
                None,
                Some(format!("invalid health check verb [{}]", options.verb)),
            )
        }
    };

    let mut url = format!("{}{}", origin, options.path);
    if !options.query.is_empty() {
        url.push('?');
        url.push_str(options.query.trim_start_matches('?'));
    }

    let mut request = http
        .client()
        .request(method, &url)
        .timeout(Duration::from_millis(options.timeout_ms));
    for (name, value) in &options.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    match request.send().await {
        Ok(response) => {
            let code = response.status().as_u16();
            debug!(backend = %backend, url = %url, status = code, "Health check completed");
            if options.expected_codes.contains(&code) {
                report(HealthStatus::Healthy, Some(code), None)
            } else {
                report(
                    HealthStatus::Unhealthy,
                    Some(code),
                    Some(format!("unexpected status {}", code)),
                )
            }
        }
        Err(e) => report(HealthStatus::Unhealthy, None, Some(e.to_string())),
    }
}

/// Aggregate pool member reports; healthy while any member is healthy
pub fn pool_report(backend: &str, members: Vec<HealthReport>) -> HealthReport {
    let healthy = members.iter().any(HealthReport::is_healthy);
    HealthReport {
        backend: backend.to_string(),
        status: if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        upstream_status: None,
        latency_ms: 0,
        detail: if members.is_empty() {
            Some("empty pool".to_string())
        } else {
            None
        },
        members,
    }
}

/// Liveness endpoint of the frontend listener
pub async fn ping() -> Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendOptions;

    fn member(name: &str, status: HealthStatus) -> HealthReport {
        HealthReport {
            backend: name.to_string(),
            status,
            upstream_status: Some(200),
            latency_ms: 1,
            detail: None,
            members: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let response = ping().await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_check_without_origin() {
        let options = BackendOptions::new("api", "rp");
        let http = HttpClientHandle::new(&options).unwrap();
        let report = check_upstream("api", &http, &options.healthcheck).await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(
            report.clone().into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_pool_report() {
        let report = pool_report(
            "lb",
            vec![
                member("a", HealthStatus::Unhealthy),
                member("b", HealthStatus::Healthy),
            ],
        );
        assert!(report.is_healthy());
        assert_eq!(report.members.len(), 2);

        let report = pool_report("lb", vec![member("a", HealthStatus::Unhealthy)]);
        assert!(!report.is_healthy());

        assert!(!pool_report("lb", Vec::new()).is_healthy());
    }
}

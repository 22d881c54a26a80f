use super::paths::PathTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health-check verb that disables the backend's health route
pub const HEALTHCHECK_DISABLED_VERB: &str = "x";

/// Backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendOptions {
    /// Backend name, filled in from the configuration key
    #[serde(skip)]
    pub name: String,
    /// Provider name, resolved against the provider registry
    pub provider: String,
    /// Upstream origin (e.g. "http://prometheus:9090")
    #[serde(default)]
    pub origin_url: String,
    /// Serve unmatched root traffic
    #[serde(default)]
    pub is_default: bool,
    /// Named cache used by cache-aware providers
    #[serde(default = "default_cache_name")]
    pub cache_name: String,
    /// Virtual hosts routed to this backend without a path prefix
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Upstream health check
    #[serde(default)]
    pub healthcheck: HealthCheckOptions,
    /// Path overrides layered on the provider's default paths
    #[serde(default)]
    pub paths: PathTable,
    /// Request rewriter applied to every path of this backend
    #[serde(default)]
    pub req_rewriter_name: Option<String>,
    /// Named tracing pipeline
    #[serde(default)]
    pub tracing_name: Option<String>,
    /// Response content types eligible for compression
    #[serde(default = "default_compressible_types")]
    pub compressible_types: Vec<String>,
    /// Do not register `/<backend-name>/...` routes
    #[serde(default)]
    pub path_routing_disabled: bool,
    /// Backend-level authenticator
    #[serde(default)]
    pub authenticator_name: Option<String>,
    /// Largest request body accepted for mutating methods
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size_bytes: usize,
    /// Forward oversized bodies truncated instead of rejecting them
    #[serde(default)]
    pub truncate_request_body_too_large: bool,
    /// Upstream request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum idle upstream connections per host
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,
    /// Load balancer settings (alb provider only)
    #[serde(default)]
    pub alb: Option<AlbOptions>,
}

/// Health check configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckOptions {
    /// HTTP verb of the check; "x" disables the health route
    #[serde(default = "default_healthcheck_verb")]
    pub verb: String,
    /// Upstream path checked
    #[serde(default = "default_healthcheck_path")]
    pub path: String,
    /// Raw query string appended to the check
    #[serde(default)]
    pub query: String,
    /// Headers sent with the check
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Upstream status codes considered healthy
    #[serde(default = "default_expected_codes")]
    pub expected_codes: Vec<u16>,
    /// Check timeout in milliseconds
    #[serde(default = "default_healthcheck_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            verb: default_healthcheck_verb(),
            path: default_healthcheck_path(),
            query: String::new(),
            headers: HashMap::new(),
            expected_codes: default_expected_codes(),
            timeout_ms: default_healthcheck_timeout_ms(),
        }
    }
}

impl HealthCheckOptions {
    pub fn is_disabled(&self) -> bool {
        self.verb.trim().eq_ignore_ascii_case(HEALTHCHECK_DISABLED_VERB)
    }
}

/// Load balancer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlbOptions {
    /// Selection mechanism
    #[serde(default)]
    pub mechanism: LoadBalanceStrategy,
    /// Names of the member backends
    pub pool: Vec<String>,
}

/// Load balancing strategy
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
}

impl BackendOptions {
    /// Minimal options for a named backend; everything else takes its default
    pub fn new(name: &str, provider: &str) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            origin_url: String::new(),
            is_default: false,
            cache_name: default_cache_name(),
            hosts: Vec::new(),
            healthcheck: HealthCheckOptions::default(),
            paths: PathTable::new(),
            req_rewriter_name: None,
            tracing_name: None,
            compressible_types: default_compressible_types(),
            path_routing_disabled: false,
            authenticator_name: None,
            max_request_body_size_bytes: default_max_request_body_size(),
            truncate_request_body_too_large: false,
            timeout_ms: default_timeout_ms(),
            max_idle_conns: default_max_idle_conns(),
            alb: None,
        }
    }
}

fn default_cache_name() -> String {
    "default".to_string()
}

fn default_compressible_types() -> Vec<String> {
    [
        "text/html",
        "text/javascript",
        "text/css",
        "text/plain",
        "text/xml",
        "text/json",
        "application/json",
        "application/javascript",
        "application/xml",
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}

fn default_max_request_body_size() -> usize {
    10 * 1024 * 1024 // 10 MB
}

fn default_timeout_ms() -> u64 {
    180_000
}

fn default_max_idle_conns() -> usize {
    20
}

fn default_healthcheck_verb() -> String {
    "GET".to_string()
}

fn default_healthcheck_path() -> String {
    "/".to_string()
}

fn default_expected_codes() -> Vec<u16> {
    vec![200]
}

fn default_healthcheck_timeout_ms() -> u64 {
    3_000
}

//! Per-path configuration and the overlay merge that layers user settings on top
//! of a provider's built-in default paths.
//!
//! Every key present in a path's YAML is recorded in [`PathConfig::custom`]. Only
//! those fields take part in [`PathConfig::merge`], so a backend can customize a
//! single field of a default path without restating the rest.

use crate::handler::Handler;
use crate::rewriter::RewriteList;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Wildcard token that expands to every supported method
pub const METHOD_WILDCARD: &str = "*";

/// Authenticator name that disables the backend-level fallback for a path
pub const AUTHENTICATOR_NONE: &str = "none";

/// Named path table, keyed by the path's configuration name
pub type PathTable = BTreeMap<String, PathConfig>;

/// Route matching semantics for a path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Exact,
    Prefix,
}

impl MatchType {
    /// Resolve a configured match type name; unknown names fall back to `Exact`
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "prefix" => MatchType::Prefix,
            _ => MatchType::Exact,
        }
    }

    pub fn is_prefix(self) -> bool {
        self == MatchType::Prefix
    }
}

/// The full set of methods a wildcard path accepts
pub fn supported_methods() -> Vec<Method> {
    vec![
        Method::GET,
        Method::HEAD,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
        Method::CONNECT,
        Method::TRACE,
        purge_method(),
    ]
}

fn purge_method() -> Method {
    Method::from_bytes(b"PURGE").unwrap_or(Method::DELETE)
}

/// Default-path naming convention: `<path>-<METHOD>-<METHOD>...`
pub fn path_key(path: &str, methods: &[&str]) -> String {
    let mut key = path.to_string();
    for method in methods {
        key.push('-');
        key.push_str(method);
    }
    key
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawPathConfig")]
pub struct PathConfig {
    /// URL pattern
    pub path: String,
    /// Configured match type name
    #[serde(rename = "match_type")]
    pub match_type_name: String,
    /// Resolved match type
    #[serde(skip)]
    pub match_type: MatchType,
    /// Name of the client handler serving this path
    #[serde(rename = "handler")]
    pub handler_name: String,
    /// Resolved handler, filled in during registration
    #[serde(skip)]
    pub handler: Option<Handler>,
    /// Allowed methods; `["*"]` means every supported method
    pub methods: Vec<String>,
    /// Headers added to the upstream request
    pub request_headers: HashMap<String, String>,
    /// Query parameters added to the upstream request
    pub request_params: HashMap<String, String>,
    /// Headers added to the downstream response
    pub response_headers: HashMap<String, String>,
    /// Status code for the `localresponse` handler
    pub response_code: u16,
    /// Body for the `localresponse` handler
    pub response_body: String,
    /// Query parameters that take part in the cache key (empty = whole query)
    pub cache_key_params: Vec<String>,
    /// Request headers that take part in the cache key
    pub cache_key_headers: Vec<String>,
    /// Name of a request rewriter applied after the backend's rewriter
    pub req_rewriter_name: Option<String>,
    /// Resolved request rewriter
    #[serde(skip)]
    pub req_rewriter: Option<Arc<RewriteList>>,
    /// Skip the metrics decorator for this path
    pub no_metrics: bool,
    /// Path-level authenticator; `none` disables the backend-level one
    pub authenticator_name: Option<String>,
    /// Overrides the backend's request body limit
    pub max_request_body_size_bytes: Option<usize>,
    /// Overrides the backend's truncate-instead-of-reject setting
    pub truncate_request_body_too_large: Option<bool>,
    /// Names of the fields explicitly set in configuration
    #[serde(skip)]
    pub custom: Vec<String>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            match_type_name: "exact".to_string(),
            match_type: MatchType::Exact,
            handler_name: "proxy".to_string(),
            handler: None,
            methods: vec!["GET".to_string(), "HEAD".to_string()],
            request_headers: HashMap::new(),
            request_params: HashMap::new(),
            response_headers: HashMap::new(),
            response_code: 200,
            response_body: String::new(),
            cache_key_params: Vec::new(),
            cache_key_headers: Vec::new(),
            req_rewriter_name: None,
            req_rewriter: None,
            no_metrics: false,
            authenticator_name: None,
            max_request_body_size_bytes: None,
            truncate_request_body_too_large: None,
            custom: Vec::new(),
        }
    }
}

impl PathConfig {
    /// Build a default path for a provider's built-in table
    pub fn new(path: &str, match_type: MatchType, handler_name: &str, methods: &[&str]) -> Self {
        Self {
            path: path.to_string(),
            match_type_name: match match_type {
                MatchType::Exact => "exact".to_string(),
                MatchType::Prefix => "prefix".to_string(),
            },
            match_type,
            handler_name: handler_name.to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Overlay `other` onto `self`: only fields named in `other.custom` are copied.
    /// The resulting marker list is the de-duplicated union of both lists.
    pub fn merge(&mut self, other: &PathConfig) {
        for field in &other.custom {
            match field.as_str() {
                "path" => self.path = other.path.clone(),
                "match_type" => {
                    self.match_type_name = other.match_type_name.clone();
                    self.match_type = MatchType::from_name(&other.match_type_name);
                }
                "handler" => {
                    self.handler_name = other.handler_name.clone();
                    self.handler = other.handler.clone();
                }
                "methods" => self.methods = other.methods.clone(),
                "request_headers" => self.request_headers = other.request_headers.clone(),
                "request_params" => self.request_params = other.request_params.clone(),
                "response_headers" => self.response_headers = other.response_headers.clone(),
                "response_code" => self.response_code = other.response_code,
                "response_body" => self.response_body = other.response_body.clone(),
                "cache_key_params" => self.cache_key_params = other.cache_key_params.clone(),
                "cache_key_headers" => self.cache_key_headers = other.cache_key_headers.clone(),
                "req_rewriter_name" => {
                    self.req_rewriter_name = other.req_rewriter_name.clone();
                    self.req_rewriter = other.req_rewriter.clone();
                }
                "no_metrics" => self.no_metrics = other.no_metrics,
                "authenticator_name" => {
                    self.authenticator_name = other.authenticator_name.clone()
                }
                "max_request_body_size_bytes" => {
                    self.max_request_body_size_bytes = other.max_request_body_size_bytes
                }
                "truncate_request_body_too_large" => {
                    self.truncate_request_body_too_large = other.truncate_request_body_too_large
                }
                unknown => {
                    warn!(field = %unknown, path = %other.path, "Ignoring unknown custom path field");
                    continue;
                }
            }
            self.custom.push(field.clone());
        }
        let mut seen = std::collections::HashSet::new();
        self.custom.retain(|f| seen.insert(f.clone()));
    }

    /// Methods accepted by this path, with the wildcard expanded
    pub fn resolved_methods(&self) -> Vec<Method> {
        if self.methods.len() == 1 && self.methods[0] == METHOD_WILDCARD {
            return supported_methods();
        }
        self.methods
            .iter()
            .filter_map(|m| match Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()) {
                Ok(method) => Some(method),
                Err(_) => {
                    warn!(method = %m, path = %self.path, "Ignoring invalid method");
                    None
                }
            })
            .collect()
    }
}

/// Wire form of a path: every field optional so presence can be recorded
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPathConfig {
    path: Option<String>,
    match_type: Option<String>,
    handler: Option<String>,
    methods: Option<Vec<String>>,
    request_headers: Option<HashMap<String, String>>,
    request_params: Option<HashMap<String, String>>,
    response_headers: Option<HashMap<String, String>>,
    response_code: Option<u16>,
    response_body: Option<String>,
    cache_key_params: Option<Vec<String>>,
    cache_key_headers: Option<Vec<String>>,
    req_rewriter_name: Option<String>,
    no_metrics: Option<bool>,
    authenticator_name: Option<String>,
    max_request_body_size_bytes: Option<usize>,
    truncate_request_body_too_large: Option<bool>,
}

impl From<RawPathConfig> for PathConfig {
    fn from(raw: RawPathConfig) -> Self {
        let mut config = PathConfig::default();
        let mut custom = Vec::new();

        macro_rules! take {
            ($field:ident, $name:literal, $target:ident) => {
                if let Some(value) = raw.$field {
                    config.$target = value;
                    custom.push($name.to_string());
                }
            };
            ($field:ident, $name:literal, $target:ident, some) => {
                if let Some(value) = raw.$field {
                    config.$target = Some(value);
                    custom.push($name.to_string());
                }
            };
        }

        take!(path, "path", path);
        take!(match_type, "match_type", match_type_name);
        take!(handler, "handler", handler_name);
        take!(methods, "methods", methods);
        take!(request_headers, "request_headers", request_headers);
        take!(request_params, "request_params", request_params);
        take!(response_headers, "response_headers", response_headers);
        take!(response_code, "response_code", response_code);
        take!(response_body, "response_body", response_body);
        take!(cache_key_params, "cache_key_params", cache_key_params);
        take!(cache_key_headers, "cache_key_headers", cache_key_headers);
        take!(req_rewriter_name, "req_rewriter_name", req_rewriter_name, some);
        take!(no_metrics, "no_metrics", no_metrics);
        take!(authenticator_name, "authenticator_name", authenticator_name, some);
        take!(
            max_request_body_size_bytes,
            "max_request_body_size_bytes",
            max_request_body_size_bytes,
            some
        );
        take!(
            truncate_request_body_too_large,
            "truncate_request_body_too_large",
            truncate_request_body_too_large,
            some
        );

        config.match_type = MatchType::from_name(&config.match_type_name);
        config.custom = custom;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_path() -> PathConfig {
        let mut base = PathConfig::new("/api/v1/query", MatchType::Prefix, "proxycache", &["GET"]);
        base.cache_key_params = vec!["query".to_string(), "time".to_string()];
        base.response_headers
            .insert("Cache-Control".to_string(), "max-age=60".to_string());
        base
    }

    #[test]
    fn test_match_type_from_name() {
        assert_eq!(MatchType::from_name("prefix"), MatchType::Prefix);
        assert_eq!(MatchType::from_name("PREFIX"), MatchType::Prefix);
        assert_eq!(MatchType::from_name("exact"), MatchType::Exact);
        assert_eq!(MatchType::from_name("regex"), MatchType::Exact);
        assert_eq!(MatchType::from_name(""), MatchType::Exact);
    }

    #[test]
    fn test_deserialization_records_custom_fields() {
        let yaml = r#"
methods: [POST]
no_metrics: true
"#;
        let path: PathConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(path.custom, vec!["methods", "no_metrics"]);
        assert_eq!(path.methods, vec!["POST"]);
        assert!(path.no_metrics);
        // untouched fields keep their defaults
        assert_eq!(path.path, "/");
        assert_eq!(path.handler_name, "proxy");
    }

    #[test]
    fn test_invalid_match_type_resolves_to_exact() {
        let path: PathConfig = serde_yaml::from_str("match_type: fuzzy").unwrap();
        assert_eq!(path.match_type, MatchType::Exact);
        assert_eq!(path.match_type_name, "fuzzy");
    }

    #[test]
    fn test_merge_only_methods() {
        let mut merged = base_path();
        let original = base_path();

        let override_path: PathConfig = serde_yaml::from_str(
            r#"
methods: [GET, POST]
"#,
        )
        .unwrap();
        merged.merge(&override_path);

        assert_eq!(merged.methods, vec!["GET", "POST"]);
        assert_eq!(merged.path, original.path);
        assert_eq!(merged.match_type, original.match_type);
        assert_eq!(merged.match_type_name, original.match_type_name);
        assert_eq!(merged.handler_name, original.handler_name);
        assert_eq!(merged.cache_key_params, original.cache_key_params);
        assert_eq!(merged.response_headers, original.response_headers);
        assert_eq!(merged.response_code, original.response_code);
        assert_eq!(merged.no_metrics, original.no_metrics);
        assert_eq!(merged.authenticator_name, original.authenticator_name);
        assert_eq!(merged.custom, vec!["methods"]);
    }

    #[test]
    fn test_merge_ignores_unmarked_fields() {
        let mut merged = base_path();
        let mut override_path = PathConfig {
            handler_name: "localresponse".to_string(),
            response_code: 418,
            ..Default::default()
        };
        override_path.custom = vec!["response_code".to_string()];

        merged.merge(&override_path);
        assert_eq!(merged.response_code, 418);
        assert_eq!(merged.handler_name, "proxycache");
    }

    #[test]
    fn test_merge_deduplicates_custom_list() {
        let mut merged: PathConfig = serde_yaml::from_str("methods: [GET]\npath: /a").unwrap();
        let override_path: PathConfig =
            serde_yaml::from_str("methods: [PUT]\nmatch_type: prefix").unwrap();

        merged.merge(&override_path);
        assert_eq!(merged.custom, vec!["path", "methods", "match_type"]);
        assert_eq!(merged.match_type, MatchType::Prefix);
        assert_eq!(merged.path, "/a");
    }

    #[test]
    fn test_wildcard_expands_to_supported_methods() {
        let path = PathConfig::new("/", MatchType::Prefix, "proxy", &["*"]);
        let methods = path.resolved_methods();
        assert_eq!(methods, supported_methods());
        assert!(methods.contains(&Method::PATCH));
        assert!(methods.iter().any(|m| m.as_str() == "PURGE"));
    }

    #[test]
    fn test_resolved_methods_normalizes_case() {
        let path = PathConfig::new("/", MatchType::Exact, "proxy", &["get", "Post"]);
        assert_eq!(path.resolved_methods(), vec![Method::GET, Method::POST]);
    }

    #[test]
    fn test_path_key() {
        assert_eq!(path_key("/", &["GET", "HEAD"]), "/-GET-HEAD");
        assert_eq!(path_key("/", &["*"]), "/-*");
    }
}
